// Chat broadcaster
//
// Local sends are recorded right away and queued per contact; a single
// dispatcher task does all network sends. One queued message goes out as a
// Tell, several as one Narrate no larger than a frame; the rest waits for
// the next pass. A failed send keeps the queue and drops the stub, so the
// next wake retries on a fresh connection.

use crate::chat::Ledger;
use crate::config::NodeConfig;
use crate::contacts::Registry;
use crate::protocol::{NarrateRequest, TellRequest, MAX_FRAME_SIZE};
use crate::shutdown::Stopper;
use crate::transport::{Transport, TransportError};
use crate::{current_timestamp, LocalId, SELF_ID};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn, Instrument, Span};

/// Maximum messages queued for a single contact
pub const MAX_QUEUE_PER_PEER: usize = 1000;

/// Narrate envelope: variant tag and message count
const NARRATE_OVERHEAD: usize = 4 + 8;

/// Encoded size of one message inside a Narrate: two length-prefixed strings.
fn message_size(identity: &str, message: &str) -> usize {
    8 + identity.len() + 8 + message.len()
}

/// What the dispatcher knows about one contact's outbound side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    Idle,
    /// Messages queued, no stub yet
    Pending,
    /// Messages queued on a resolved stub
    InFlight,
}

struct Outbound<S> {
    address: String,
    pending: VecDeque<String>,
    stub: Option<S>,
}

struct Batch<S> {
    id: LocalId,
    address: String,
    stub: Option<S>,
    messages: Vec<String>,
}

pub struct ChatBroadcaster<T: Transport> {
    registry: Arc<dyn Registry>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<T>,
    address: String,
    identity: String,
    outbound: Mutex<BTreeMap<LocalId, Outbound<T::Stub>>>,
    wake: Notify,
    poll_interval: Duration,
    max_frame_size: usize,
    stopper: Stopper,
    span: Span,
}

impl<T: Transport> ChatBroadcaster<T> {
    pub fn new(
        config: &NodeConfig,
        registry: Arc<dyn Registry>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<T>,
        stopper: Stopper,
        span: Span,
    ) -> Self {
        Self {
            registry,
            ledger,
            transport,
            address: config.address(),
            identity: config.identity.clone(),
            outbound: Mutex::new(BTreeMap::new()),
            wake: Notify::new(),
            poll_interval: Duration::from_millis(config.broadcaster.poll_interval_ms),
            max_frame_size: config.transport.max_frame_size.min(MAX_FRAME_SIZE),
            stopper,
            span,
        }
    }

    fn fatal(&self, reason: &str) -> bool {
        error!("Broadcaster invariant violated: {}", reason);
        self.stopper.stop();
        false
    }

    /// Record `text` as sent to the selected contact and queue it for relay.
    pub fn handle_send(&self, text: &str) -> bool {
        let _span = self.span.enter();
        let (contact, chat) = (self.registry.current(), self.ledger.current());
        let id = match (contact, chat) {
            (Some(contact), Some(chat)) if contact == chat => contact,
            _ => {
                return self.fatal(&format!(
                    "selection mismatch, contacts {:?} chat {:?}",
                    contact, chat
                ))
            }
        };
        let Some(target) = self.registry.get(id) else {
            return self.fatal(&format!("selected contact {} missing", id));
        };
        let relayed = id != SELF_ID && target.address != self.address;
        if relayed {
            if NARRATE_OVERHEAD + message_size(&self.identity, text) > self.max_frame_size {
                warn!(
                    "Refusing {} byte message for contact {}, larger than a frame",
                    text.len(),
                    id
                );
                return false;
            }
            let queued = self.pending(id);
            if queued >= MAX_QUEUE_PER_PEER {
                warn!("Outbox full for contact {} ({} queued)", id, queued);
                return false;
            }
        }
        if !self.ledger.send(id, text, current_timestamp()) {
            return self.fatal(&format!("failed to record sent message for {}", id));
        }
        if !self.registry.send(id) {
            return self.fatal(&format!("failed to mark contact {} as sent", id));
        }
        if !relayed {
            debug!("Message to self, nothing to relay");
            return true;
        }

        self.outbound
            .lock()
            .entry(id)
            .or_insert_with(|| Outbound {
                address: target.address.clone(),
                pending: VecDeque::new(),
                stub: None,
            })
            .pending
            .push_back(text.to_string());
        self.wake.notify_one();
        true
    }

    /// Inbound single message.
    pub fn handle_tell(&self, request: &TellRequest) -> bool {
        let _span = self.span.enter();
        self.handle_receive(&request.identity, std::slice::from_ref(&request.message))
    }

    /// Inbound batch. Mixed or missing identities are rejected whole.
    pub fn handle_narrate(&self, request: &NarrateRequest) -> bool {
        let _span = self.span.enter();
        let Some(identity) = request.sole_identity() else {
            warn!("Rejecting narrate without a single identity");
            return false;
        };
        let messages: Vec<String> = request.messages.iter().map(|m| m.message.clone()).collect();
        self.handle_receive(identity, &messages)
    }

    fn handle_receive(&self, identity: &str, messages: &[String]) -> bool {
        let Some(id) = self.registry.lookup(identity) else {
            warn!("Message from unknown identity {}", identity);
            return false;
        };
        if messages.is_empty() {
            return false;
        }
        // A message is proof of life
        if !self.registry.activate(id) {
            return self.fatal(&format!("failed to activate contact {}", id));
        }
        for message in messages {
            if !self.registry.receive(id) {
                return self.fatal(&format!("failed to mark contact {} as received", id));
            }
            if !self.ledger.receive(id, message, current_timestamp()) {
                return self.fatal(&format!("failed to record received message for {}", id));
            }
        }
        debug!("Received {} message(s) from contact {}", messages.len(), id);
        true
    }

    /// Messages waiting for `id`.
    pub fn pending(&self, id: LocalId) -> usize {
        self.outbound
            .lock()
            .get(&id)
            .map(|o| o.pending.len())
            .unwrap_or(0)
    }

    pub fn outbound_state(&self, id: LocalId) -> OutboundState {
        match self.outbound.lock().get(&id) {
            Some(o) if !o.pending.is_empty() && o.stub.is_some() => OutboundState::InFlight,
            Some(o) if !o.pending.is_empty() => OutboundState::Pending,
            _ => OutboundState::Idle,
        }
    }

    /// Oldest messages of each queue, as many as fit one frame.
    fn snapshot(&self) -> Vec<Batch<T::Stub>> {
        self.outbound
            .lock()
            .iter()
            .filter(|(_, o)| !o.pending.is_empty())
            .map(|(id, o)| {
                let mut size = NARRATE_OVERHEAD;
                let mut messages = Vec::new();
                for message in &o.pending {
                    size += message_size(&self.identity, message);
                    if size > self.max_frame_size && !messages.is_empty() {
                        break;
                    }
                    messages.push(message.clone());
                }
                Batch {
                    id: *id,
                    address: o.address.clone(),
                    stub: o.stub.clone(),
                    messages,
                }
            })
            .collect()
    }

    async fn relay(&self, batch: Batch<T::Stub>) {
        let stub = match batch.stub {
            Some(stub) => stub,
            None => match self.transport.create_stub(&batch.address).await {
                Ok(stub) => {
                    if let Some(outbound) = self.outbound.lock().get_mut(&batch.id) {
                        outbound.stub = Some(stub.clone());
                    }
                    stub
                }
                Err(e) => {
                    debug!("Cannot resolve {} for chat {}: {}", batch.address, batch.id, e);
                    return;
                }
            },
        };

        let count = batch.messages.len();
        let result = if count == 1 {
            let request = TellRequest {
                identity: self.identity.clone(),
                message: batch.messages.into_iter().next().unwrap_or_default(),
            };
            self.transport.send_tell(&stub, request).await.map(|_| ())
        } else {
            let request = NarrateRequest::new(&self.identity, batch.messages);
            self.transport.send_narrate(&stub, request).await.map(|_| ())
        };

        let mut outbound = self.outbound.lock();
        let Some(entry) = outbound.get_mut(&batch.id) else {
            return;
        };
        match result {
            Ok(()) => {
                // Producers only append, so the sent batch is still the front
                entry.pending.drain(..count.min(entry.pending.len()));
                debug!("Relayed {} message(s) to {}", count, batch.address);
            }
            Err(TransportError::Codec(e)) if count == 1 => {
                error!("Dropping message to {} that cannot be encoded: {}", batch.address, e);
                entry.pending.pop_front();
            }
            Err(e) => {
                warn!("Relay of {} message(s) to {} failed: {}", count, batch.address, e);
                entry.stub = None;
            }
        }
    }

    /// Run the dispatcher until stopped.
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            info!("Chat dispatcher started");
            while !self.stopper.stopped() {
                for batch in self.snapshot() {
                    if self.stopper.stopped() {
                        break;
                    }
                    self.relay(batch).await;
                }
                tokio::select! {
                    _ = self.stopper.wait() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
            info!("Chat dispatcher stopped");
        }
        .instrument(span)
        .await
    }
}
