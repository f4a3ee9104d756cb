// Chat: per-contact message history and its local rendering stream.

mod chunk;
mod entry;
mod ledger;

pub use chunk::{split, Reassembler, ReassemblyError};
pub use entry::{ChatEntry, ChatFrame, ChatPiece, Direction};
pub use ledger::ChatLedger;

use crate::LocalId;

/// Per-contact chat history as seen by discovery and the broadcaster.
///
/// Ids must be allocated in lockstep with the contact registry.
#[cfg_attr(test, mockall::automock)]
pub trait Ledger: Send + Sync {
    /// Allocate the empty history for `id`, which must be the next free id.
    fn create(&self, id: LocalId) -> bool;
    fn send(&self, id: LocalId, text: &str, timestamp: u64) -> bool;
    fn receive(&self, id: LocalId, text: &str, timestamp: u64) -> bool;
    /// Display `id` and replay its history.
    fn select(&self, id: LocalId) -> bool;
    /// Redraw `id` from scratch: clear the view, then replay its history.
    fn clear(&self, id: LocalId) -> bool;
    fn get(&self, id: LocalId) -> Option<Vec<ChatEntry>>;
    fn current(&self) -> Option<LocalId>;
    fn size(&self) -> usize;
}
