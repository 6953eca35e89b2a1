//! End-to-end session scenarios against an in-process relay.
//!
//! Each participant is a `RelayClient` running in its own task; the test
//! drives it through the command channel and observes `SessionUpdate`s.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::time::Duration;

use codecast_client::session::CONNECTION_FAILED;
use codecast_client::{
    ClientCommand, ClientConfig, ClientError, RelayClient, SessionController, SessionUpdate,
};
use codecast_core::ConnectionId;
use codecast_protocol::{encode_frame, RelayMessage};
use codecastd::{spawn_registry, RelayConfig, RelayServer};
use futures_util::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const UPDATE_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestRelay {
    addr: SocketAddr,
    cancel_token: CancellationToken,
    server_task: JoinHandle<()>,
}

impl TestRelay {
    async fn spawn() -> Self {
        let config = RelayConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..RelayConfig::default()
        };
        let registry = spawn_registry(config.max_members_per_room);
        let cancel_token = CancellationToken::new();
        let server = RelayServer::bind(&config, registry, cancel_token.clone())
            .await
            .expect("bind relay");
        let addr = server.local_addr().expect("local addr");
        let server_task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            cancel_token,
            server_task,
        }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            server_url: format!("ws://{}", self.addr),
            ..ClientConfig::default()
        }
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(UPDATE_TIMEOUT, self.server_task)
            .await
            .expect("relay did not stop")
            .expect("relay task panicked");
    }
}

/// A participant running in a background task.
struct Participant {
    commands: mpsc::UnboundedSender<ClientCommand>,
    updates: mpsc::UnboundedReceiver<SessionUpdate>,
    task: JoinHandle<codecast_client::Result<()>>,
}

impl Participant {
    fn start(config: ClientConfig, room_id: &str, display_name: &str) -> Self {
        let (update_tx, updates) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let room_id = room_id.to_string();
        let display_name = display_name.to_string();

        let task = tokio::spawn(async move {
            let mut client = RelayClient::new(
                config,
                SessionController::new(),
                update_tx,
                command_rx,
                CancellationToken::new(),
            );
            client.run(&room_id, &display_name).await
        });

        Self {
            commands,
            updates,
            task,
        }
    }

    /// Starts a participant and waits until it has joined.
    async fn joined(config: ClientConfig, room_id: &str, display_name: &str) -> Self {
        let mut p = Self::start(config, room_id, display_name);
        p.wait_for(|u| matches!(u, SessionUpdate::Roster(_))).await;
        p
    }

    fn edit(&self, code: &str) {
        self.commands
            .send(ClientCommand::Edit(code.to_string()))
            .unwrap();
    }

    /// Skips updates until one matches.
    async fn wait_for(&mut self, pred: impl Fn(&SessionUpdate) -> bool) -> SessionUpdate {
        loop {
            let update = timeout(UPDATE_TIMEOUT, self.updates.recv())
                .await
                .expect("timed out waiting for update")
                .expect("update channel closed");
            if pred(&update) {
                return update;
            }
        }
    }

    async fn wait_notice(&mut self, text: &str) {
        self.wait_for(|u| matches!(u, SessionUpdate::Notice(n) if n.message == text))
            .await;
    }

    async fn finish(self) -> codecast_client::Result<()> {
        timeout(UPDATE_TIMEOUT, self.task)
            .await
            .expect("client did not stop")
            .expect("client task panicked")
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_newcomer_receives_existing_buffer_and_edits_flow() {
    let relay = TestRelay::spawn().await;

    let mut alice = Participant::joined(relay.config(), "R1", "alice").await;
    alice.edit("x=1");
    // Let alice's task apply the edit before bob appears
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = Participant::start(relay.config(), "R1", "bob");
    alice.wait_notice("bob joined the room.").await;

    let update = bob.wait_for(|u| matches!(u, SessionUpdate::Buffer(_))).await;
    assert_eq!(update, SessionUpdate::Buffer("x=1".to_string()));

    bob.edit("x=2");
    let update = alice.wait_for(|u| matches!(u, SessionUpdate::Buffer(_))).await;
    assert_eq!(update, SessionUpdate::Buffer("x=2".to_string()));

    bob.commands.send(ClientCommand::Leave).unwrap();
    let roster = alice.wait_for(|u| matches!(u, SessionUpdate::Roster(_))).await;
    match roster {
        SessionUpdate::Roster(r) => assert_eq!(r.len(), 1),
        other => panic!("expected roster, got {other:?}"),
    }
    alice.wait_notice("bob left the room").await;

    assert!(bob.finish().await.is_ok());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_malformed_join_redirects_without_connecting() {
    let mut p = Participant::start(ClientConfig::default(), "R1", "  ");

    p.wait_notice("Display name is required").await;
    p.wait_for(|u| matches!(u, SessionUpdate::Redirect)).await;
    p.wait_for(|u| matches!(u, SessionUpdate::Closed)).await;

    assert!(matches!(p.finish().await, Err(ClientError::Session(_))));
}

#[tokio::test]
async fn test_relay_unreachable_reports_connection_failure() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig {
        server_url: format!("ws://{addr}"),
        ..ClientConfig::default()
    };
    let mut p = Participant::start(config, "R1", "alice");

    p.wait_notice(CONNECTION_FAILED).await;
    p.wait_for(|u| matches!(u, SessionUpdate::Redirect)).await;
    assert!(matches!(p.finish().await, Err(ClientError::Connect(_))));
}

#[tokio::test]
async fn test_relay_shutdown_is_a_transport_failure() {
    let relay = TestRelay::spawn().await;
    let mut alice = Participant::joined(relay.config(), "R1", "alice").await;

    relay.shutdown().await;

    alice.wait_notice(CONNECTION_FAILED).await;
    alice.wait_for(|u| matches!(u, SessionUpdate::Redirect)).await;
    assert!(matches!(alice.finish().await, Err(ClientError::ConnectionLost)));
}

#[tokio::test]
async fn test_socket_dropped_without_close_is_websocket_error() {
    // A relay that says hello, then vanishes without a close frame
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let hello = encode_frame(&RelayMessage::connected(ConnectionId::new("conn-1"))).unwrap();
        ws.send(Message::Text(hello.into())).await.unwrap();
        drop(ws);
    });

    let config = ClientConfig {
        server_url: format!("ws://{addr}"),
        ..ClientConfig::default()
    };
    let mut p = Participant::start(config, "R1", "alice");

    p.wait_notice(CONNECTION_FAILED).await;
    p.wait_for(|u| matches!(u, SessionUpdate::Redirect)).await;
    assert!(matches!(p.finish().await, Err(ClientError::WebSocket(_))));
}
