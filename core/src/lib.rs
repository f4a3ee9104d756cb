// TerminalTeams core: peer lifecycle and message relay
//
// Nodes find each other by greeting configured neighbors, keep each other
// alive with heartbeats and relay chat text directly. No server in the middle.

pub mod broadcaster;
pub mod chat;
pub mod config;
pub mod contacts;
pub mod discovery;
pub mod engine;
pub mod local;
pub mod protocol;
pub mod service;
pub mod shutdown;
pub mod timer;
pub mod transport;

use thiserror::Error;

pub use broadcaster::ChatBroadcaster;
pub use chat::{ChatEntry, ChatFrame, ChatLedger, ChatPiece, Direction, Ledger, Reassembler};
pub use config::NodeConfig;
pub use contacts::{Contact, ContactRegistry, ContactStatus, ContactsFrame, Registry, StatusUpdate};
pub use discovery::DiscoveryProtocol;
pub use engine::Engine;
pub use local::{DuplexChannel, LocalBridge, MemoryChannel};
pub use service::NeighborsService;
pub use shutdown::Stopper;
pub use transport::{LocalTransport, RequestHandler, TcpServer, TcpTransport, Transport, TransportError};

/// Process-local dense contact index. `0` is always the node itself.
pub type LocalId = usize;

/// The local id of the node's own contact.
pub const SELF_ID: LocalId = 0;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum TeamsError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Local channel closed")]
    ChannelClosed,
    #[error("Already running")]
    AlreadyRunning,
    #[error("Not running")]
    NotRunning,
    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Milliseconds since the unix epoch, used to stamp chat entries.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
