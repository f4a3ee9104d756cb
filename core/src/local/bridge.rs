// Local bridge
//
// Drains a frame queue into a duplex channel. When the queue stays idle for
// one heartbeat interval the bridge sends a heartbeat frame, so the view can
// tell a quiet node from a dead one. On stop it flushes what is queued and
// says goodbye. A failed send stops the node.

use super::DuplexChannel;
use crate::chat::ChatFrame;
use crate::contacts::ContactsFrame;
use crate::shutdown::Stopper;
use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, Instrument, Span};

/// Maximum encoded local frame: 64 KB
pub const MAX_LOCAL_FRAME_SIZE: usize = 64 * 1024;

/// Room for the piece header around the chunk bytes
const PIECE_OVERHEAD: usize = 64;

/// Largest chunk size whose pieces still fit a local frame
pub const MAX_CHUNK_SIZE: usize = MAX_LOCAL_FRAME_SIZE - PIECE_OVERHEAD;

/// Frames that can travel over a bridge.
pub trait BridgeFrame: Serialize + Send + 'static {
    fn heartbeat() -> Self;
    fn goodbye() -> Self;
}

impl BridgeFrame for ContactsFrame {
    fn heartbeat() -> Self {
        ContactsFrame::Heartbeat
    }

    fn goodbye() -> Self {
        ContactsFrame::Goodbye
    }
}

impl BridgeFrame for ChatFrame {
    fn heartbeat() -> Self {
        ChatFrame::Heartbeat
    }

    fn goodbye() -> Self {
        ChatFrame::Goodbye
    }
}

pub fn encode_frame<F: Serialize>(frame: &F) -> Result<Vec<u8>> {
    let bytes = bincode::serialize(frame)?;
    if bytes.len() > MAX_LOCAL_FRAME_SIZE {
        bail!(
            "Local frame too large: {} bytes (max {})",
            bytes.len(),
            MAX_LOCAL_FRAME_SIZE
        );
    }
    Ok(bytes)
}

pub fn decode_frame<F: DeserializeOwned>(bytes: &[u8]) -> Result<F> {
    if bytes.len() > MAX_LOCAL_FRAME_SIZE {
        bail!("Local frame too large: {} bytes", bytes.len());
    }
    Ok(bincode::deserialize(bytes)?)
}

pub struct LocalBridge<F: BridgeFrame> {
    name: &'static str,
    channel: Arc<dyn DuplexChannel>,
    frames: UnboundedReceiver<F>,
    heartbeat: Duration,
    stopper: Stopper,
    span: Span,
}

impl<F: BridgeFrame> LocalBridge<F> {
    pub fn new(
        name: &'static str,
        channel: Arc<dyn DuplexChannel>,
        frames: UnboundedReceiver<F>,
        heartbeat: Duration,
        stopper: Stopper,
        span: Span,
    ) -> Self {
        Self {
            name,
            channel,
            frames,
            heartbeat,
            stopper,
            span,
        }
    }

    async fn forward(&self, frame: &F) -> bool {
        let bytes = match encode_frame(frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to encode {} frame: {}", self.name, e);
                return false;
            }
        };
        self.channel.send(bytes).await
    }

    fn fail(&self) {
        error!("{} bridge lost its channel, stopping", self.name);
        self.stopper.stop();
    }

    pub async fn run(mut self) {
        let span = self.span.clone();
        async move {
            if !self.channel.open().await {
                self.fail();
                return;
            }
            info!("{} bridge started", self.name);
            loop {
                if self.stopper.stopped() {
                    break;
                }
                tokio::select! {
                    _ = self.stopper.wait() => break,
                    frame = self.frames.recv() => match frame {
                        Some(frame) => {
                            if !self.forward(&frame).await {
                                self.fail();
                                return;
                            }
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(self.heartbeat) => {
                        if !self.forward(&F::heartbeat()).await {
                            self.fail();
                            return;
                        }
                    }
                }
            }
            while let Ok(frame) = self.frames.try_recv() {
                if !self.forward(&frame).await {
                    debug!("{} bridge dropped queued frames on exit", self.name);
                    return;
                }
            }
            if !self.forward(&F::goodbye()).await {
                debug!("{} bridge could not say goodbye", self.name);
            }
            info!("{} bridge stopped", self.name);
        }
        .instrument(span)
        .await
    }
}
