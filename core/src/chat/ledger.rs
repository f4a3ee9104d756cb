// Chat ledger
//
// Append-only history per contact. Only the displayed contact streams to
// the local view; switching contacts clears the view and replays history.

use super::{split, ChatEntry, ChatFrame, Direction, Ledger};
use crate::shutdown::Stopper;
use crate::local::MAX_CHUNK_SIZE;
use crate::LocalId;
use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn, Span};

#[derive(Default)]
struct LedgerState {
    histories: Vec<Vec<ChatEntry>>,
    current: Option<LocalId>,
}

pub struct ChatLedger {
    state: RwLock<LedgerState>,
    frames: UnboundedSender<ChatFrame>,
    chunk_size: usize,
    stopper: Stopper,
    span: Span,
}

impl ChatLedger {
    pub fn new(
        chunk_size: usize,
        frames: UnboundedSender<ChatFrame>,
        stopper: Stopper,
        span: Span,
    ) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            frames,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
            stopper,
            span,
        }
    }

    fn deliver(&self, frame: ChatFrame) -> bool {
        if self.frames.send(frame).is_err() {
            error!("Chat view queue closed, stopping");
            self.stopper.stop();
            return false;
        }
        true
    }

    fn deliver_entry(&self, id: LocalId, entry: &ChatEntry) -> bool {
        split(id, entry.direction, entry.timestamp, &entry.text, self.chunk_size)
            .into_iter()
            .all(|piece| self.deliver(ChatFrame::Piece(piece)))
    }

    fn append(&self, id: LocalId, direction: Direction, text: &str, timestamp: u64) -> bool {
        let _span = self.span.enter();
        let mut state = self.state.write();
        let Some(history) = state.histories.get_mut(id) else {
            warn!("No chat history for contact {}", id);
            return false;
        };
        let entry = ChatEntry::new(direction, text, timestamp);
        history.push(entry.clone());
        debug!("Appended {} entry of {} bytes to chat {}", direction, text.len(), id);
        if state.current == Some(id) {
            return self.deliver_entry(id, &entry);
        }
        true
    }

    fn replay(&self, id: LocalId) -> bool {
        let _span = self.span.enter();
        let mut state = self.state.write();
        let Some(history) = state.histories.get(id) else {
            warn!("Cannot display unknown chat {}", id);
            return false;
        };
        if !self.deliver(ChatFrame::Clear { contact: id }) {
            return false;
        }
        let replayed = history.iter().all(|entry| self.deliver_entry(id, entry));
        state.current = Some(id);
        info!("Displaying chat {} ({} entries)", id, state.histories[id].len());
        replayed
    }
}

impl Ledger for ChatLedger {
    fn create(&self, id: LocalId) -> bool {
        let mut state = self.state.write();
        if id != state.histories.len() {
            error!(
                "Chat {} out of lockstep, next free id is {}",
                id,
                state.histories.len()
            );
            return false;
        }
        state.histories.push(Vec::new());
        true
    }

    fn send(&self, id: LocalId, text: &str, timestamp: u64) -> bool {
        self.append(id, Direction::Sent, text, timestamp)
    }

    fn receive(&self, id: LocalId, text: &str, timestamp: u64) -> bool {
        self.append(id, Direction::Received, text, timestamp)
    }

    fn select(&self, id: LocalId) -> bool {
        self.replay(id)
    }

    fn clear(&self, id: LocalId) -> bool {
        self.replay(id)
    }

    fn get(&self, id: LocalId) -> Option<Vec<ChatEntry>> {
        self.state.read().histories.get(id).cloned()
    }

    fn current(&self) -> Option<LocalId> {
        self.state.read().current
    }

    fn size(&self) -> usize {
        self.state.read().histories.len()
    }
}
