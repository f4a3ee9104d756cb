// Engine: one running node
//
// Owns the registry, ledger, discovery loop, chat dispatcher and both local
// bridges. The node is its own contact 0 and starts with that contact
// selected. Serving inbound calls is left to the caller, which registers
// `Engine::service` with whatever server fits the transport.

use crate::broadcaster::ChatBroadcaster;
use crate::chat::{ChatFrame, ChatLedger, Ledger};
use crate::config::NodeConfig;
use crate::contacts::{Contact, ContactRegistry, ContactsFrame, Registry};
use crate::discovery::DiscoveryProtocol;
use crate::local::{DuplexChannel, LocalBridge};
use crate::service::NeighborsService;
use crate::shutdown::Stopper;
use crate::transport::{RequestHandler, Transport};
use crate::{LocalId, TeamsError, SELF_ID};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Span};

type Bridges = (LocalBridge<ContactsFrame>, LocalBridge<ChatFrame>);

pub struct Engine<T: Transport> {
    config: NodeConfig,
    registry: Arc<ContactRegistry>,
    ledger: Arc<ChatLedger>,
    discovery: Arc<DiscoveryProtocol<T>>,
    broadcaster: Arc<ChatBroadcaster<T>>,
    service: Arc<NeighborsService<T>>,
    bridges: Mutex<Option<Bridges>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: RwLock<bool>,
    /// Serializes mailbox and switcher calls
    external: Mutex<()>,
    stopper: Stopper,
    span: Span,
}

impl<T: Transport> Engine<T> {
    pub fn new(
        config: NodeConfig,
        transport: Arc<T>,
        contacts_channel: Arc<dyn DuplexChannel>,
        chat_channel: Arc<dyn DuplexChannel>,
    ) -> Result<Self, TeamsError> {
        config.validate()?;
        let span = info_span!("node", nickname = %config.nickname);
        let stopper = Stopper::new();

        let (contacts_tx, contacts_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ContactRegistry::new(
            contacts_tx,
            stopper.clone(),
            info_span!(parent: &span, "contacts"),
        ));
        let ledger = Arc::new(ChatLedger::new(
            config.chunk_size,
            chat_tx,
            stopper.clone(),
            info_span!(parent: &span, "chat"),
        ));

        let address = config.address();
        if !registry.create(&config.nickname, &config.identity, &address)
            || !registry.select(SELF_ID)
            || !ledger.create(SELF_ID)
            || !ledger.select(SELF_ID)
        {
            return Err(TeamsError::Bootstrap("failed to register self contact".into()));
        }

        let discovery = Arc::new(DiscoveryProtocol::new(
            &config,
            registry.clone(),
            ledger.clone(),
            transport.clone(),
            stopper.clone(),
            info_span!(parent: &span, "discovery"),
        )?);
        let broadcaster = Arc::new(ChatBroadcaster::new(
            &config,
            registry.clone(),
            ledger.clone(),
            transport,
            stopper.clone(),
            info_span!(parent: &span, "broadcaster"),
        ));
        let service = Arc::new(NeighborsService::new(
            discovery.clone(),
            broadcaster.clone(),
            registry.clone(),
            stopper.clone(),
        ));

        let heartbeat = Duration::from_millis(config.bridge.heartbeat_interval_ms);
        let bridges = (
            LocalBridge::new(
                "contacts",
                contacts_channel,
                contacts_rx,
                heartbeat,
                stopper.clone(),
                info_span!(parent: &span, "contacts_bridge"),
            ),
            LocalBridge::new(
                "chat",
                chat_channel,
                chat_rx,
                heartbeat,
                stopper.clone(),
                info_span!(parent: &span, "chat_bridge"),
            ),
        );

        Ok(Self {
            config,
            registry,
            ledger,
            discovery,
            broadcaster,
            service,
            bridges: Mutex::new(Some(bridges)),
            tasks: Mutex::new(Vec::new()),
            running: RwLock::new(false),
            external: Mutex::new(()),
            stopper,
            span,
        })
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), TeamsError> {
        let _span = self.span.enter();
        let mut running = self.running.write();
        if *running {
            return Err(TeamsError::AlreadyRunning);
        }
        let Some((contacts_bridge, chat_bridge)) = self.bridges.lock().take() else {
            // Bridges are consumed by the first start
            return Err(TeamsError::AlreadyRunning);
        };
        if self.stopper.stopped() {
            return Err(TeamsError::NotRunning);
        }

        info!("Node starting at {}", self.config.address());
        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(contacts_bridge.run()));
        tasks.push(tokio::spawn(chat_bridge.run()));
        tasks.push(tokio::spawn(self.discovery.clone().run()));
        tasks.push(tokio::spawn(self.broadcaster.clone().run()));
        *running = true;
        info!("Node started");
        Ok(())
    }

    /// Send `text` to the selected contact.
    pub fn mailbox(&self, text: &str) -> bool {
        let _guard = self.external.lock();
        if self.stopper.stopped() {
            return false;
        }
        self.broadcaster.handle_send(text)
    }

    /// Select contact `id` in both the contact list and the chat view.
    /// Out of range ids are ignored.
    pub fn switcher(&self, id: LocalId) -> bool {
        let _guard = self.external.lock();
        let _span = self.span.enter();
        if self.stopper.stopped() {
            return false;
        }
        if id >= self.registry.size() {
            warn!("Ignoring switch to unknown contact {}", id);
            return false;
        }
        if self.registry.current() == Some(id) && self.ledger.current() == Some(id) {
            return true;
        }
        if !self.registry.select(id) || !self.ledger.select(id) {
            error!("Contacts and chat disagree on selecting {}, stopping", id);
            self.stopper.stop();
            return false;
        }
        true
    }

    pub fn stop(&self) {
        info!("Node stopping");
        self.stopper.stop();
    }

    /// Wait for a stop, from any source, then join every worker.
    pub async fn wait(&self) {
        self.stopper.wait().await;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!("Worker ended abnormally: {}", e);
            }
        }
        *self.running.write() = false;
        info!("Node stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.running.read() && !self.stopper.stopped()
    }

    /// Handler for inbound neighbor calls.
    pub fn service(&self) -> Arc<dyn RequestHandler> {
        self.service.clone()
    }

    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn address(&self) -> String {
        self.config.address()
    }

    pub fn registry(&self) -> Arc<ContactRegistry> {
        self.registry.clone()
    }

    pub fn ledger(&self) -> Arc<ChatLedger> {
        self.ledger.clone()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.registry.contacts()
    }

    pub fn pending(&self, id: LocalId) -> usize {
        self.broadcaster.pending(id)
    }
}

impl<T: Transport> Drop for Engine<T> {
    fn drop(&mut self) {
        self.stopper.stop();
    }
}
