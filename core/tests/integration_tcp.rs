/// Integration tests: two nodes talking over loopback TCP
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tteams_core::config::{DiscoveryConfig, NetworkInterface};
use tteams_core::{
    ContactStatus, Direction, Engine, Ledger, MemoryChannel, NodeConfig, Registry, TcpServer,
    TcpTransport,
};

struct Node {
    engine: Engine<TcpTransport>,
    // Views must outlive the engine or the bridges stop it
    _views: (MemoryChannel, MemoryChannel),
}

async fn bind() -> (TcpServer, u16) {
    let server = TcpServer::bind("127.0.0.1:0", &Default::default())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    (server, port)
}

fn start(nickname: &str, server: TcpServer, port: u16, neighbors: &[u16]) -> Node {
    let mut config = NodeConfig::new(nickname, format!("id-{}", nickname))
        .with_interface(NetworkInterface::new("lo", Ipv4Addr::LOCALHOST, port))
        .with_discovery(
            DiscoveryConfig::default()
                .with_greet(30, 60)
                .with_heartbeat(30, 60),
        )
        .with_poll_interval(10)
        .with_rpc_timeout(1000);
    for neighbor in neighbors {
        config = config.with_neighbor(format!("127.0.0.1:{}", neighbor));
    }

    let (contacts, contacts_view) = MemoryChannel::pair();
    let (chat, chat_view) = MemoryChannel::pair();
    let transport = Arc::new(TcpTransport::new(&config.transport));
    let engine = Engine::new(config, transport, Arc::new(contacts), Arc::new(chat)).unwrap();
    tokio::spawn(server.serve(engine.service(), engine.stopper()));
    engine.start().unwrap();
    Node {
        engine,
        _views: (contacts_view, chat_view),
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_nodes_over_tcp() {
    let (bob_server, bob_port) = bind().await;
    let (alice_server, alice_port) = bind().await;
    let bob = start("bob", bob_server, bob_port, &[]);
    let alice = start("alice", alice_server, alice_port, &[bob_port]);

    wait_until("discovery", || {
        alice.engine.registry().lookup("id-bob") == Some(1)
            && bob.engine.registry().lookup("id-alice") == Some(1)
    })
    .await;
    assert_eq!(
        bob.engine.registry().get(1).unwrap().address,
        format!("127.0.0.1:{}", alice_port)
    );

    assert!(alice.engine.switcher(1));
    assert!(alice.engine.mailbox("over the wire"));
    assert!(alice.engine.mailbox("and again"));
    wait_until("delivery", || bob.engine.ledger().get(1).unwrap().len() == 2).await;

    let history = bob.engine.ledger().get(1).unwrap();
    assert_eq!(history[0].direction, Direction::Received);
    assert_eq!(history[0].text, "over the wire");
    assert_eq!(history[1].text, "and again");
    assert_eq!(bob.engine.registry().get(1).unwrap().received_count, 2);
    wait_until("alice to drain", || alice.engine.pending(1) == 0).await;

    // Stopping alice closes her listener, so bob's heartbeats fail
    alice.engine.stop();
    tokio::time::timeout(Duration::from_secs(3), alice.engine.wait())
        .await
        .unwrap();
    wait_until("bob to mark alice inactive", || {
        bob.engine.registry().status(1) == Some(ContactStatus::Inactive)
    })
    .await;
    assert!(bob.engine.is_running());
}
