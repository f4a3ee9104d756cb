// Terminal views
//
// The node pushes contact updates and chat pieces over two local channels.
// These tasks decode them and print colored lines to stdout.

use colored::*;
use std::sync::Arc;
use tteams_core::local::decode_frame;
use tteams_core::{
    ChatEntry, ChatFrame, ContactRegistry, ContactStatus, ContactsFrame, Direction,
    DuplexChannel, MemoryChannel, Reassembler, Registry, StatusUpdate,
};

pub fn format_time(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}

fn colored_status(status: ContactStatus) -> ColoredString {
    let name = status.to_string();
    match status {
        ContactStatus::SelectedActive => name.bright_green().bold(),
        ContactStatus::SelectedInactive | ContactStatus::SelectedPendingInactive => {
            name.yellow().bold()
        }
        ContactStatus::Active => name.green(),
        ContactStatus::UnreadActive | ContactStatus::UnreadInactive => name.bright_cyan(),
        ContactStatus::PendingInactive => name.yellow(),
        ContactStatus::Inactive => name.dimmed(),
    }
}

pub fn contact_line(update: &StatusUpdate) -> String {
    format!(
        "{} #{} {} {} (sent {}, received {})",
        "•".bright_green(),
        update.id,
        update.nickname.bright_cyan(),
        colored_status(update.status),
        update.sent_count,
        update.received_count
    )
}

pub fn chat_line(nickname: &str, entry: &ChatEntry) -> String {
    let time = format!("[{}]", format_time(entry.timestamp)).dimmed();
    match entry.direction {
        Direction::Sent => format!("{} {} {}", time, "→".bright_green(), entry.text),
        Direction::Received => format!(
            "{} {} {}: {}",
            time,
            "←".bright_blue(),
            nickname.bright_cyan(),
            entry.text
        ),
    }
}

/// Print contact updates until the node says goodbye.
pub async fn contacts_view(view: MemoryChannel) {
    if !view.open().await {
        return;
    }
    while let Some(bytes) = view.receive().await {
        match decode_frame::<ContactsFrame>(&bytes) {
            Ok(ContactsFrame::Status(update)) => println!("{}", contact_line(&update)),
            Ok(ContactsFrame::Heartbeat) => {}
            Ok(ContactsFrame::Goodbye) => break,
            Err(e) => tracing::warn!("Bad contacts frame: {}", e),
        }
    }
}

/// Print the displayed chat until the node says goodbye.
pub async fn chat_view(view: MemoryChannel, registry: Arc<ContactRegistry>) {
    if !view.open().await {
        return;
    }
    let nickname = |id| {
        registry
            .get(id)
            .map(|c| c.nickname)
            .unwrap_or_else(|| format!("#{}", id))
    };
    let mut reassembler = Reassembler::new();
    while let Some(bytes) = view.receive().await {
        match decode_frame::<ChatFrame>(&bytes) {
            Ok(ChatFrame::Clear { contact }) => {
                reassembler.reset();
                println!();
                println!("{}", format!("── chat with {} ──", nickname(contact)).bold());
            }
            Ok(ChatFrame::Piece(piece)) => match reassembler.push(piece) {
                Ok(Some((contact, entry))) => println!("{}", chat_line(&nickname(contact), &entry)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Dropping garbled chat entry: {}", e),
            },
            Ok(ChatFrame::Heartbeat) => {}
            Ok(ChatFrame::Goodbye) => break,
            Err(e) => tracing::warn!("Bad chat frame: {}", e),
        }
    }
}
