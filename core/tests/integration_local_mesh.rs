/// Integration tests: several nodes in one process over the in-memory transport
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tteams_core::config::DiscoveryConfig;
use tteams_core::local::decode_frame;
use tteams_core::{
    ChatFrame, ContactStatus, ContactsFrame, Direction, DuplexChannel, Engine, Ledger,
    LocalTransport, MemoryChannel, NodeConfig, Reassembler, Registry,
};

struct Peer {
    engine: Engine<LocalTransport>,
    chat: Arc<Mutex<Vec<ChatFrame>>>,
    contacts: Arc<Mutex<Vec<ContactsFrame>>>,
}

fn address(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

fn config(nickname: &str, port: u16, neighbors: &[u16]) -> NodeConfig {
    let mut config = NodeConfig::new(nickname, format!("id-{}", nickname))
        .with_discovery(
            DiscoveryConfig::default()
                .with_greet(20, 40)
                .with_heartbeat(20, 40),
        )
        .with_poll_interval(10)
        .with_rpc_timeout(500)
        .with_bridge_heartbeat(100);
    config.interface.port = port;
    for neighbor in neighbors {
        config = config.with_neighbor(address(*neighbor));
    }
    config
}

/// Collect every frame a view receives.
fn watch<F>(view: MemoryChannel) -> Arc<Mutex<Vec<F>>>
where
    F: serde::de::DeserializeOwned + Send + 'static,
{
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = frames.clone();
    tokio::spawn(async move {
        view.open().await;
        while let Some(bytes) = view.receive().await {
            if let Ok(frame) = decode_frame::<F>(&bytes) {
                sink.lock().push(frame);
            }
        }
    });
    frames
}

fn spawn_peer(transport: &Arc<LocalTransport>, config: NodeConfig) -> Peer {
    let (contacts, contacts_view) = MemoryChannel::pair();
    let (chat, chat_view) = MemoryChannel::pair();
    let engine = Engine::new(config, transport.clone(), Arc::new(contacts), Arc::new(chat)).unwrap();
    let peer = Peer {
        contacts: watch(contacts_view),
        chat: watch(chat_view),
        engine,
    };
    transport.register(peer.engine.address(), peer.engine.service());
    peer.engine.start().unwrap();
    peer
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn knows(peer: &Peer, identity: &str) -> bool {
    peer.engine.registry().lookup(identity).is_some()
}

/// What a chat view shows after applying every frame.
fn rendered(frames: &[ChatFrame]) -> Vec<(usize, Direction, String)> {
    let mut reassembler = Reassembler::new();
    let mut screen = Vec::new();
    for frame in frames {
        match frame {
            ChatFrame::Clear { .. } => {
                reassembler.reset();
                screen.clear();
            }
            ChatFrame::Piece(piece) => {
                if let Some((contact, entry)) = reassembler.push(piece.clone()).unwrap() {
                    screen.push((contact, entry.direction, entry.text));
                }
            }
            ChatFrame::Heartbeat | ChatFrame::Goodbye => {}
        }
    }
    screen
}

async fn linked_pair(transport: &Arc<LocalTransport>) -> (Peer, Peer) {
    let bob = spawn_peer(transport, config("bob", 9302, &[]));
    let alice = spawn_peer(transport, config("alice", 9301, &[9302]));
    wait_until("alice and bob to meet", || {
        knows(&alice, "id-bob") && knows(&bob, "id-alice")
    })
    .await;
    (alice, bob)
}

#[tokio::test]
async fn test_greet_creates_contacts_on_both_sides() {
    let transport = Arc::new(LocalTransport::new());
    let (alice, bob) = linked_pair(&transport).await;

    for (peer, other) in [(&alice, "bob"), (&bob, "alice")] {
        let registry = peer.engine.registry();
        assert_eq!(registry.size(), 2);
        assert_eq!(peer.engine.ledger().size(), 2);
        let contact = registry.get(1).unwrap();
        assert_eq!(contact.nickname, other);
        assert_eq!(contact.identity, format!("id-{}", other));
        assert!(contact.status.is_active());
    }
    assert_eq!(alice.engine.registry().get(1).unwrap().address, address(9302));
    assert_eq!(bob.engine.registry().get(1).unwrap().address, address(9301));

    wait_until("bob's view to list alice", || {
        bob.contacts.lock().iter().any(|frame| {
            matches!(frame, ContactsFrame::Status(update) if update.id == 1 && update.nickname == "alice")
        })
    })
    .await;
}

#[tokio::test]
async fn test_tell_is_delivered_and_rendered() {
    let transport = Arc::new(LocalTransport::new());
    let (alice, bob) = linked_pair(&transport).await;

    assert!(bob.engine.switcher(1));
    assert!(alice.engine.switcher(1));
    let long = "x".repeat(5000);
    assert!(alice.engine.mailbox("hello bob"));
    wait_until("first message", || bob.engine.ledger().get(1).unwrap().len() == 1).await;
    assert!(alice.engine.mailbox(&long));
    wait_until("second message", || bob.engine.ledger().get(1).unwrap().len() == 2).await;

    let history = bob.engine.ledger().get(1).unwrap();
    assert_eq!(history[0].direction, Direction::Received);
    assert_eq!(history[0].text, "hello bob");
    assert_eq!(history[1].text, long);

    let from_bob = alice.engine.registry().get(1).unwrap();
    assert_eq!(from_bob.sent_count, 2);
    let at_bob = bob.engine.registry().get(1).unwrap();
    assert_eq!(at_bob.received_count, 2);
    assert_eq!(at_bob.status, ContactStatus::SelectedActive);

    wait_until("bob's view to render both", || rendered(&bob.chat.lock()).len() == 2).await;
    let screen = rendered(&bob.chat.lock());
    assert_eq!(screen[0], (1, Direction::Received, "hello bob".to_string()));
    assert_eq!(screen[1], (1, Direction::Received, long.clone()));

    wait_until("alice's view to render both", || rendered(&alice.chat.lock()).len() == 2).await;
    assert!(rendered(&alice.chat.lock())
        .iter()
        .all(|(contact, direction, _)| *contact == 1 && *direction == Direction::Sent));
}

#[tokio::test]
async fn test_unselected_receive_marks_unread() {
    let transport = Arc::new(LocalTransport::new());
    let (alice, bob) = linked_pair(&transport).await;

    assert!(alice.engine.switcher(1));
    assert!(alice.engine.mailbox("psst"));
    wait_until("bob to receive", || bob.engine.ledger().get(1).unwrap().len() == 1).await;
    assert_eq!(
        bob.engine.registry().status(1),
        Some(ContactStatus::UnreadActive)
    );
    // Bob still looks at his own chat, which stays empty
    assert!(rendered(&bob.chat.lock()).is_empty());

    assert!(bob.engine.switcher(1));
    assert_eq!(
        bob.engine.registry().status(1),
        Some(ContactStatus::SelectedActive)
    );
    wait_until("bob's view to replay", || rendered(&bob.chat.lock()).len() == 1).await;
}

#[tokio::test]
async fn test_partition_queues_then_narrates_in_order() {
    let transport = Arc::new(LocalTransport::new());
    let (alice, bob) = linked_pair(&transport).await;
    assert!(alice.engine.switcher(1));

    transport.unregister(&alice.engine.address());
    transport.unregister(&bob.engine.address());
    wait_until("alice to lose bob", || {
        alice.engine.registry().status(1) == Some(ContactStatus::SelectedInactive)
    })
    .await;

    assert!(alice.engine.mailbox("one"));
    assert_eq!(
        alice.engine.registry().status(1),
        Some(ContactStatus::PendingInactive)
    );
    for text in ["two", "three"] {
        assert!(alice.engine.mailbox(text));
    }
    assert_eq!(
        alice.engine.registry().status(1),
        Some(ContactStatus::SelectedPendingInactive)
    );
    assert_eq!(alice.engine.pending(1), 3);
    assert!(!alice.engine.stopper().stopped());

    transport.register(alice.engine.address(), alice.engine.service());
    transport.register(bob.engine.address(), bob.engine.service());
    wait_until("bob to receive the backlog", || {
        bob.engine.ledger().get(1).unwrap().len() == 3
    })
    .await;
    let texts: Vec<String> = bob
        .engine
        .ledger()
        .get(1)
        .unwrap()
        .into_iter()
        .map(|entry| entry.text)
        .collect();
    assert_eq!(texts, ["one", "two", "three"]);

    wait_until("alice to drain and see bob again", || {
        alice.engine.pending(1) == 0
            && alice.engine.registry().status(1) == Some(ContactStatus::SelectedActive)
    })
    .await;
}

#[tokio::test]
async fn test_three_nodes_keep_ids_dense() {
    let transport = Arc::new(LocalTransport::new());
    let bob = spawn_peer(&transport, config("bob", 9312, &[]));
    let carol = spawn_peer(&transport, config("carol", 9313, &[9312]));
    let alice = spawn_peer(&transport, config("alice", 9311, &[9312, 9313]));

    let everyone = [&alice, &bob, &carol];
    wait_until("full mesh", || {
        everyone.iter().all(|peer| {
            ["id-alice", "id-bob", "id-carol"]
                .iter()
                .all(|identity| knows(peer, identity))
        })
    })
    .await;

    for peer in everyone {
        let registry = peer.engine.registry();
        assert_eq!(registry.size(), 3);
        assert_eq!(peer.engine.ledger().size(), 3);
        assert_eq!(registry.selected_count(), 1);
        assert_eq!(registry.lookup(&peer.engine.config().identity), Some(0));
        let mut ids: Vec<usize> = registry.contacts().iter().map(|c| c.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, [0, 1, 2]);
    }
}

#[tokio::test]
async fn test_stopped_node_goes_inactive_and_says_goodbye() {
    let transport = Arc::new(LocalTransport::new());
    let (alice, bob) = linked_pair(&transport).await;

    alice.engine.stop();
    tokio::time::timeout(Duration::from_secs(2), alice.engine.wait())
        .await
        .unwrap();
    assert!(!alice.engine.is_running());
    assert!(!alice.engine.mailbox("after stop"));

    // Alice is still registered but rejects every call
    wait_until("bob to mark alice inactive", || {
        bob.engine.registry().status(1) == Some(ContactStatus::Inactive)
    })
    .await;

    wait_until("alice's views to say goodbye", || {
        alice.chat.lock().last() == Some(&ChatFrame::Goodbye)
            && alice.contacts.lock().last() == Some(&ContactsFrame::Goodbye)
    })
    .await;
    assert!(bob.engine.is_running());
}
