// Discovery protocol
//
// Keeps the contact list in sync with who is actually reachable. Every
// neighbor walks Unresolved -> Resolved -> Greeted. Unresolved and Resolved
// neighbors are greeted on a slow jittered timer; greeted ones get a
// heartbeat on a faster one. Any failed call drops the stub and sends the
// neighbor back to Unresolved. There is no retry limit.
//
// One loop serves all neighbors. The neighbor table lock is never held
// across a network call: due work is snapshotted, then performed.

use crate::chat::Ledger;
use crate::config::NodeConfig;
use crate::contacts::Registry;
use crate::protocol::{GreetRequest, HeartbeatRequest};
use crate::shutdown::Stopper;
use crate::timer::{JitterRange, JitterTimer};
use crate::transport::Transport;
use crate::{LocalId, TeamsError, SELF_ID};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn, Instrument, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Resolved,
    Greeted(LocalId),
}

struct Neighbor<S> {
    state: Resolution,
    stub: Option<S>,
    greet: JitterTimer,
    heartbeat: JitterTimer,
}

impl<S> Neighbor<S> {
    fn new(greet: JitterRange, heartbeat: JitterRange) -> Self {
        Self {
            state: Resolution::Unresolved,
            stub: None,
            greet: JitterTimer::new(greet),
            heartbeat: JitterTimer::new(heartbeat),
        }
    }

    fn regress(&mut self) {
        self.state = Resolution::Unresolved;
        self.stub = None;
    }
}

enum Due<S> {
    Greet {
        address: String,
        stub: Option<S>,
    },
    Heartbeat {
        address: String,
        id: LocalId,
        stub: Option<S>,
    },
}

/// Self description built from contact 0.
pub(crate) fn self_descriptor(registry: &dyn Registry) -> Option<GreetRequest> {
    registry.get(SELF_ID).map(|contact| GreetRequest {
        nickname: contact.nickname,
        identity: contact.identity,
        address: contact.address,
    })
}

pub struct DiscoveryProtocol<T: Transport> {
    registry: Arc<dyn Registry>,
    ledger: Arc<dyn Ledger>,
    transport: Arc<T>,
    address: String,
    identity: String,
    greet_range: JitterRange,
    heartbeat_range: JitterRange,
    neighbors: Mutex<BTreeMap<String, Neighbor<T::Stub>>>,
    wake: Notify,
    stopper: Stopper,
    span: Span,
}

impl<T: Transport> DiscoveryProtocol<T> {
    pub fn new(
        config: &NodeConfig,
        registry: Arc<dyn Registry>,
        ledger: Arc<dyn Ledger>,
        transport: Arc<T>,
        stopper: Stopper,
        span: Span,
    ) -> Result<Self, TeamsError> {
        let greet_range = config.discovery.greet_range();
        let heartbeat_range = config.discovery.heartbeat_range();
        let address = config.address();
        let mut neighbors = BTreeMap::new();
        for neighbor in config.neighbor_addresses()? {
            if neighbor == address {
                debug!("Skipping own address {} in neighbor list", neighbor);
                continue;
            }
            neighbors.insert(neighbor, Neighbor::new(greet_range, heartbeat_range));
        }
        Ok(Self {
            registry,
            ledger,
            transport,
            address,
            identity: config.identity.clone(),
            greet_range,
            heartbeat_range,
            neighbors: Mutex::new(neighbors),
            wake: Notify::new(),
            stopper,
            span,
        })
    }

    /// Inbound greet. Unknown identities become new contacts, known ones are
    /// marked alive.
    pub fn handle_greet(&self, request: &GreetRequest) -> bool {
        let _span = self.span.enter();
        self.add_neighbor(request, None, None)
    }

    /// Inbound heartbeat from a known identity marks it alive.
    pub fn handle_heartbeat(&self, identity: &str) -> bool {
        let _span = self.span.enter();
        let Some(id) = self.registry.lookup(identity) else {
            debug!("Heartbeat from unknown identity {}", identity);
            return false;
        };
        if !self.registry.activate(id) {
            return self.fatal(&format!("failed to activate contact {} on heartbeat", id));
        }
        true
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.lock().len()
    }

    /// Resolution state of the neighbor at `address`.
    pub fn resolution(&self, address: &str) -> Option<Resolution> {
        self.neighbors.lock().get(address).map(|n| n.state)
    }

    fn fatal(&self, reason: &str) -> bool {
        error!("Discovery invariant violated: {}", reason);
        self.stopper.stop();
        false
    }

    /// Create or activate the contact described by `peer` and track it.
    /// `key` is the neighbor table entry the description came from.
    fn add_neighbor(&self, peer: &GreetRequest, stub: Option<T::Stub>, key: Option<&str>) -> bool {
        if peer.nickname.is_empty() || peer.identity.is_empty() || peer.address.is_empty() {
            warn!("Rejecting greet with empty fields: {:?}", peer);
            return false;
        }
        // Held across create so registry and ledger ids advance together
        let mut neighbors = self.neighbors.lock();

        let id = match self.registry.lookup(&peer.identity) {
            Some(id) => {
                if !self.registry.activate(id) {
                    return self.fatal(&format!("failed to activate contact {}", id));
                }
                id
            }
            None => {
                if !self
                    .registry
                    .create(&peer.nickname, &peer.identity, &peer.address)
                {
                    return self.fatal(&format!("failed to create contact {}", peer.identity));
                }
                let Some(id) = self.registry.lookup(&peer.identity) else {
                    return self.fatal(&format!("contact {} vanished after create", peer.identity));
                };
                if !self.ledger.create(id) {
                    return self.fatal(&format!("failed to create chat {}", id));
                }
                info!("Discovered {} ({}) at {}", peer.nickname, peer.identity, peer.address);
                id
            }
        };

        let key = key.unwrap_or(&peer.address).to_string();
        if id == SELF_ID {
            if neighbors.remove(&key).is_some() {
                info!("Neighbor {} is this node, dropping it", key);
            }
            return true;
        }

        neighbors.retain(|address, n| *address == key || n.state != Resolution::Greeted(id));
        let (greet_range, heartbeat_range) = (self.greet_range, self.heartbeat_range);
        let neighbor = neighbors
            .entry(key)
            .or_insert_with(|| Neighbor::new(greet_range, heartbeat_range));
        neighbor.state = Resolution::Greeted(id);
        if stub.is_some() {
            neighbor.stub = stub;
        }
        neighbor.heartbeat.kick();
        drop(neighbors);

        self.wake.notify_one();
        true
    }

    fn regress(&self, address: &str) {
        if let Some(neighbor) = self.neighbors.lock().get_mut(address) {
            neighbor.regress();
        }
    }

    fn store_stub(&self, address: &str, stub: &T::Stub) {
        if let Some(neighbor) = self.neighbors.lock().get_mut(address) {
            if neighbor.state == Resolution::Unresolved {
                neighbor.state = Resolution::Resolved;
            }
            neighbor.stub = Some(stub.clone());
        }
    }

    fn collect_due(&self) -> Vec<Due<T::Stub>> {
        let mut neighbors = self.neighbors.lock();
        let mut due = Vec::new();
        for (address, neighbor) in neighbors.iter_mut() {
            match neighbor.state {
                Resolution::Unresolved | Resolution::Resolved => {
                    if neighbor.greet.expired() {
                        neighbor.greet.kick();
                        due.push(Due::Greet {
                            address: address.clone(),
                            stub: neighbor.stub.clone(),
                        });
                    }
                }
                Resolution::Greeted(id) => {
                    if neighbor.heartbeat.expired() {
                        neighbor.heartbeat.kick();
                        due.push(Due::Heartbeat {
                            address: address.clone(),
                            id,
                            stub: neighbor.stub.clone(),
                        });
                    }
                }
            }
        }
        due
    }

    fn next_wake(&self) -> Duration {
        self.neighbors
            .lock()
            .values()
            .map(|n| match n.state {
                Resolution::Greeted(_) => n.heartbeat.remaining(),
                _ => n.greet.remaining(),
            })
            .min()
            .unwrap_or(self.heartbeat_range.max)
    }

    async fn resolve(&self, address: &str, stub: Option<T::Stub>) -> Option<T::Stub> {
        if let Some(stub) = stub {
            return Some(stub);
        }
        match self.transport.create_stub(address).await {
            Ok(stub) => {
                self.store_stub(address, &stub);
                Some(stub)
            }
            Err(e) => {
                debug!("Cannot resolve neighbor {}: {}", address, e);
                None
            }
        }
    }

    async fn greet(&self, address: String, stub: Option<T::Stub>) {
        let Some(stub) = self.resolve(&address, stub).await else {
            self.regress(&address);
            return;
        };
        let Some(request) = self_descriptor(self.registry.as_ref()) else {
            self.fatal("self contact missing");
            return;
        };
        match self.transport.send_greet(&stub, request).await {
            Ok(reply) => {
                if !self.add_neighbor(&reply, Some(stub), Some(&address)) {
                    self.regress(&address);
                }
            }
            Err(e) => {
                debug!("Greet to {} failed: {}", address, e);
                self.regress(&address);
            }
        }
    }

    async fn heartbeat(&self, address: String, id: LocalId, stub: Option<T::Stub>) {
        let Some(contact) = self.registry.get(id) else {
            self.fatal(&format!("greeted contact {} missing", id));
            return;
        };
        let alive = match self.resolve(&address, stub).await {
            Some(stub) => {
                let request = HeartbeatRequest {
                    identity: self.identity.clone(),
                };
                match self.transport.send_heartbeat(&stub, request).await {
                    Ok(reply) if reply.identity == contact.identity => true,
                    Ok(reply) => {
                        warn!(
                            "Heartbeat from {} answered by {} instead of {}",
                            address, reply.identity, contact.identity
                        );
                        false
                    }
                    Err(e) => {
                        debug!("Heartbeat to {} failed: {}", address, e);
                        false
                    }
                }
            }
            None => false,
        };

        if alive {
            if !self.registry.activate(id) {
                self.fatal(&format!("failed to activate contact {}", id));
            }
        } else {
            if !self.registry.deactivate(id) {
                self.fatal(&format!("failed to deactivate contact {}", id));
                return;
            }
            self.regress(&address);
        }
    }

    /// Run until stopped.
    pub async fn run(self: Arc<Self>) {
        let span = self.span.clone();
        async move {
            info!(
                "Discovery started on {} with {} neighbors",
                self.address,
                self.neighbor_count()
            );
            while !self.stopper.stopped() {
                for due in self.collect_due() {
                    if self.stopper.stopped() {
                        break;
                    }
                    match due {
                        Due::Greet { address, stub } => self.greet(address, stub).await,
                        Due::Heartbeat { address, id, stub } => {
                            self.heartbeat(address, id, stub).await
                        }
                    }
                }
                let idle = self.next_wake();
                tokio::select! {
                    _ = self.stopper.wait() => break,
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(idle) => {}
                }
            }
            info!("Discovery stopped");
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatLedger, MockLedger};
    use crate::config::DiscoveryConfig;
    use crate::contacts::{ContactRegistry, ContactStatus, MockRegistry};
    use crate::protocol::{HeartbeatReply, Request, Response};
    use crate::transport::{LocalTransport, RequestHandler};
    use tokio::sync::mpsc;

    struct Node {
        registry: Arc<ContactRegistry>,
        ledger: Arc<ChatLedger>,
        stopper: Stopper,
        _views: (
            mpsc::UnboundedReceiver<crate::contacts::ContactsFrame>,
            mpsc::UnboundedReceiver<crate::chat::ChatFrame>,
        ),
    }

    fn node(nickname: &str, identity: &str, address: &str) -> Node {
        let (ctx, crx) = mpsc::unbounded_channel();
        let (ltx, lrx) = mpsc::unbounded_channel();
        let stopper = Stopper::new();
        let registry = Arc::new(ContactRegistry::new(ctx, stopper.clone(), Span::none()));
        let ledger = Arc::new(ChatLedger::new(2048, ltx, stopper.clone(), Span::none()));
        assert!(registry.create(nickname, identity, address));
        assert!(registry.select(SELF_ID));
        assert!(ledger.create(SELF_ID));
        assert!(ledger.select(SELF_ID));
        Node {
            registry,
            ledger,
            stopper,
            _views: (crx, lrx),
        }
    }

    fn config(neighbors: &[&str]) -> NodeConfig {
        let mut config = NodeConfig::new("self", "id-self")
            .with_discovery(DiscoveryConfig::default().with_greet(20, 30).with_heartbeat(10, 20));
        config.interface.port = 9000;
        for n in neighbors {
            config = config.with_neighbor(*n);
        }
        config
    }

    fn discovery(node: &Node, neighbors: &[&str], transport: LocalTransport) -> DiscoveryProtocol<LocalTransport> {
        DiscoveryProtocol::new(
            &config(neighbors),
            node.registry.clone(),
            node.ledger.clone(),
            Arc::new(transport),
            node.stopper.clone(),
            Span::none(),
        )
        .unwrap()
    }

    fn greet(nickname: &str, identity: &str, address: &str) -> GreetRequest {
        GreetRequest {
            nickname: nickname.into(),
            identity: identity.into(),
            address: address.into(),
        }
    }

    /// Peer that answers greets and heartbeats with a fixed identity.
    struct Peer {
        descriptor: GreetRequest,
    }

    impl RequestHandler for Peer {
        fn handle(&self, request: Request) -> Response {
            match request {
                Request::Greet(_) => Response::Greet(self.descriptor.clone()),
                Request::Heartbeat(_) => Response::Heartbeat(HeartbeatReply {
                    identity: self.descriptor.identity.clone(),
                }),
                _ => Response::Rejected {
                    reason: "unsupported".into(),
                },
            }
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_handle_greet_creates_contact_and_chat() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let discovery = discovery(&node, &[], LocalTransport::new());

        assert!(discovery.handle_greet(&greet("B", "id-B", "5.6.7.8:9")));
        let id = node.registry.lookup("id-B").unwrap();
        assert_eq!(id, 1);
        assert_eq!(node.registry.get(id).unwrap().nickname, "B");
        assert_eq!(node.ledger.size(), 2);
        assert_eq!(discovery.resolution("5.6.7.8:9"), Some(Resolution::Greeted(1)));
    }

    #[test]
    fn test_handle_greet_known_identity_activates() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let discovery = discovery(&node, &[], LocalTransport::new());
        discovery.handle_greet(&greet("B", "id-B", "5.6.7.8:9"));
        node.registry.deactivate(1);

        assert!(discovery.handle_greet(&greet("B", "id-B", "5.6.7.8:9")));
        assert_eq!(node.registry.status(1), Some(ContactStatus::Active));
        assert_eq!(node.registry.size(), 2);
    }

    #[test]
    fn test_handle_greet_rejects_empty_fields() {
        let registry = MockRegistry::new();
        let ledger = MockLedger::new();
        let stopper = Stopper::new();
        let discovery = DiscoveryProtocol::new(
            &config(&[]),
            Arc::new(registry),
            Arc::new(ledger),
            Arc::new(LocalTransport::new()),
            stopper.clone(),
            Span::none(),
        )
        .unwrap();

        // Mocks without expectations panic if touched
        assert!(!discovery.handle_greet(&greet("", "id-B", "5.6.7.8:9")));
        assert!(!discovery.handle_greet(&greet("B", "", "5.6.7.8:9")));
        assert!(!discovery.handle_greet(&greet("B", "id-B", "")));
        assert!(!stopper.stopped());
    }

    #[test]
    fn test_handle_heartbeat_unknown_rejected() {
        let mut registry = MockRegistry::new();
        registry.expect_lookup().times(1).returning(|_| None);
        let stopper = Stopper::new();
        let discovery = DiscoveryProtocol::new(
            &config(&[]),
            Arc::new(registry),
            Arc::new(MockLedger::new()),
            Arc::new(LocalTransport::new()),
            stopper.clone(),
            Span::none(),
        )
        .unwrap();

        assert!(!discovery.handle_heartbeat("id-ghost"));
        assert!(!stopper.stopped());
    }

    #[test]
    fn test_ledger_create_failure_is_fatal() {
        let mut registry = MockRegistry::new();
        let mut ledger = MockLedger::new();
        let mut seq = mockall::Sequence::new();
        registry
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| None);
        registry
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| true);
        registry
            .expect_lookup()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Some(1));
        ledger.expect_create().times(1).returning(|_| false);

        let stopper = Stopper::new();
        let discovery = DiscoveryProtocol::new(
            &config(&[]),
            Arc::new(registry),
            Arc::new(ledger),
            Arc::new(LocalTransport::new()),
            stopper.clone(),
            Span::none(),
        )
        .unwrap();

        assert!(!discovery.handle_greet(&greet("B", "id-B", "5.6.7.8:9")));
        assert!(stopper.stopped());
    }

    #[test]
    fn test_handle_heartbeat_known_activates() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let discovery = discovery(&node, &[], LocalTransport::new());
        discovery.handle_greet(&greet("B", "id-B", "5.6.7.8:9"));
        node.registry.deactivate(1);

        assert!(discovery.handle_heartbeat("id-B"));
        assert_eq!(node.registry.status(1), Some(ContactStatus::Active));
    }

    #[test]
    fn test_own_address_not_tracked() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let discovery = discovery(&node, &["127.0.0.1", "127.0.0.2"], LocalTransport::new());
        assert_eq!(discovery.neighbor_count(), 1);
        assert_eq!(discovery.resolution("127.0.0.2:9000"), Some(Resolution::Unresolved));
    }

    #[tokio::test]
    async fn test_loop_greets_then_heartbeats() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let transport = LocalTransport::new();
        transport.register(
            "10.0.0.2:9000",
            Arc::new(Peer {
                descriptor: greet("B", "id-B", "10.0.0.2:9000"),
            }),
        );
        let discovery = Arc::new(discovery(&node, &["10.0.0.2"], transport.clone()));
        let task = tokio::spawn(discovery.clone().run());

        wait_until(|| node.registry.lookup("id-B").is_some()).await;
        assert_eq!(
            discovery.resolution("10.0.0.2:9000"),
            Some(Resolution::Greeted(1))
        );

        // Peer disappears: heartbeats fail and the contact goes inactive
        transport.unregister("10.0.0.2:9000");
        wait_until(|| node.registry.status(1) == Some(ContactStatus::Inactive)).await;
        wait_until(|| discovery.resolution("10.0.0.2:9000") == Some(Resolution::Unresolved)).await;

        // Peer comes back: greet succeeds and the contact is active again
        transport.register(
            "10.0.0.2:9000",
            Arc::new(Peer {
                descriptor: greet("B", "id-B", "10.0.0.2:9000"),
            }),
        );
        wait_until(|| node.registry.status(1) == Some(ContactStatus::Active)).await;
        assert_eq!(node.registry.size(), 2);

        node.stopper.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_neighbor_pointing_at_self_is_dropped() {
        let node = node("self", "id-self", "127.0.0.1:9000");
        let transport = LocalTransport::new();
        transport.register(
            "10.0.0.9:9000",
            Arc::new(Peer {
                descriptor: greet("self", "id-self", "127.0.0.1:9000"),
            }),
        );
        let discovery = Arc::new(discovery(&node, &["10.0.0.9"], transport));
        let task = tokio::spawn(discovery.clone().run());

        wait_until(|| discovery.neighbor_count() == 0).await;
        assert_eq!(node.registry.size(), 1);

        node.stopper.stop();
        task.await.unwrap();
    }
}
