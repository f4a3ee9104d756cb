// Local delivery: the link between a node and its rendering processes.

mod bridge;
mod memory;

pub use bridge::{
    decode_frame, encode_frame, BridgeFrame, LocalBridge, MAX_CHUNK_SIZE, MAX_LOCAL_FRAME_SIZE,
};
pub use memory::MemoryChannel;

use async_trait::async_trait;

/// Byte pipe to a local view. `receive` yields `None` once the other end
/// is gone.
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    async fn open(&self) -> bool;
    async fn send(&self, bytes: Vec<u8>) -> bool;
    async fn receive(&self) -> Option<Vec<u8>>;
    fn alive(&self) -> bool;
}
