use super::DuplexChannel;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// In-process duplex channel; [`MemoryChannel::pair`] returns both ends.
pub struct MemoryChannel {
    tx: UnboundedSender<Vec<u8>>,
    rx: Mutex<UnboundedReceiver<Vec<u8>>>,
    opened: AtomicBool,
    closed: AtomicBool,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryChannel) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(tx: UnboundedSender<Vec<u8>>, rx: UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
            opened: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Refuse further sends from this end.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DuplexChannel for MemoryChannel {
    async fn open(&self) -> bool {
        self.opened.store(true, Ordering::SeqCst);
        self.alive()
    }

    async fn send(&self, bytes: Vec<u8>) -> bool {
        self.alive() && self.tx.send(bytes).is_ok()
    }

    async fn receive(&self) -> Option<Vec<u8>> {
        self.rx.lock().await.recv().await
    }

    fn alive(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
            && !self.closed.load(Ordering::SeqCst)
            && !self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let (a, b) = MemoryChannel::pair();
        assert!(a.open().await);
        assert!(b.open().await);

        assert!(a.send(b"ping".to_vec()).await);
        assert_eq!(b.receive().await.unwrap(), b"ping");
        assert!(b.send(b"pong".to_vec()).await);
        assert_eq!(a.receive().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (a, _b) = MemoryChannel::pair();
        assert!(!a.alive());
        assert!(!a.send(vec![1]).await);
    }

    #[tokio::test]
    async fn test_dropped_peer_is_dead() {
        let (a, b) = MemoryChannel::pair();
        a.open().await;
        drop(b);
        assert!(!a.alive());
        assert!(!a.send(vec![1]).await);
        assert!(a.receive().await.is_none());
    }

    #[tokio::test]
    async fn test_close() {
        let (a, _b) = MemoryChannel::pair();
        a.open().await;
        a.close();
        assert!(!a.alive());
        assert!(!a.send(vec![1]).await);
    }
}
