use crate::LocalId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Sent => write!(f, "SENT"),
            Direction::Received => write!(f, "RECEIVED"),
        }
    }
}

/// One message in a contact's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub direction: Direction,
    /// Unix milliseconds
    pub timestamp: u64,
    pub text: String,
}

impl ChatEntry {
    pub fn new(direction: Direction, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            direction,
            timestamp,
            text: text.into(),
        }
    }
}

/// A bounded slice of one entry's text. `last` marks the terminal piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPiece {
    pub contact: LocalId,
    pub direction: Direction,
    pub timestamp: u64,
    pub data: Vec<u8>,
    pub last: bool,
}

/// Frames on the local chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatFrame {
    /// Wipe the view; `contact` is about to be replayed.
    Clear { contact: LocalId },
    Piece(ChatPiece),
    Heartbeat,
    Goodbye,
}
