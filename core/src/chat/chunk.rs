// Chunking of chat text for the local view.
//
// Text is cut on byte boundaries, so a piece may end inside a multi-byte
// character. Only the reassembled entry is decoded.

use super::{ChatEntry, ChatPiece, Direction};
use crate::LocalId;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("Reassembled text is not valid UTF-8")]
    InvalidUtf8,
}

/// Split `text` into `ceil(len / chunk_size)` pieces, at least one.
pub fn split(
    contact: LocalId,
    direction: Direction,
    timestamp: u64,
    text: &str,
    chunk_size: usize,
) -> Vec<ChatPiece> {
    let chunk_size = chunk_size.max(1);
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return vec![ChatPiece {
            contact,
            direction,
            timestamp,
            data: Vec::new(),
            last: true,
        }];
    }
    let count = bytes.len().div_ceil(chunk_size);
    bytes
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, data)| ChatPiece {
            contact,
            direction,
            timestamp,
            data: data.to_vec(),
            last: index + 1 == count,
        })
        .collect()
}

struct Partial {
    contact: LocalId,
    direction: Direction,
    timestamp: u64,
    data: Vec<u8>,
}

/// Joins consecutive pieces of the same contact and direction.
#[derive(Default)]
pub struct Reassembler {
    partial: Option<Partial>,
    dropped: usize,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one piece. Returns the finished entry on the terminal piece.
    /// A piece of another contact or direction drops the partial entry
    /// and starts a new one.
    pub fn push(&mut self, piece: ChatPiece) -> Result<Option<(LocalId, ChatEntry)>, ReassemblyError> {
        let mut partial = match self.partial.take() {
            Some(partial)
                if partial.contact == piece.contact && partial.direction == piece.direction =>
            {
                partial
            }
            stale => {
                if let Some(stale) = stale {
                    warn!(
                        "Piece for contact {} ({}) interleaved with contact {} ({}), dropping {} bytes",
                        piece.contact,
                        piece.direction,
                        stale.contact,
                        stale.direction,
                        stale.data.len()
                    );
                    self.dropped += 1;
                }
                Partial {
                    contact: piece.contact,
                    direction: piece.direction,
                    timestamp: piece.timestamp,
                    data: Vec::new(),
                }
            }
        };
        partial.data.extend_from_slice(&piece.data);

        if !piece.last {
            self.partial = Some(partial);
            return Ok(None);
        }
        let text = String::from_utf8(partial.data).map_err(|_| ReassemblyError::InvalidUtf8)?;
        Ok(Some((
            partial.contact,
            ChatEntry::new(partial.direction, text, partial.timestamp),
        )))
    }

    /// Forget any partial entry, e.g. after a clear.
    pub fn reset(&mut self) {
        self.partial = None;
    }

    pub fn is_idle(&self) -> bool {
        self.partial.is_none()
    }

    /// Partial entries abandoned because another entry cut in.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
