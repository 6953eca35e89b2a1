//! WebSocket server for the codecast relay.
//!
//! The server:
//! - Listens on TCP and upgrades each connection to a WebSocket
//! - Assigns every connection an id and spawns a `ConnectionHandler`
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept() + WebSocket upgrade
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │ (per socket)    │◀────│  (via Outbox)   │
//! └─────────────────┘     └─────────────────┘
//! ```

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, WRITE_TIMEOUT};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use codecast_core::ConnectionId;

use crate::config::RelayConfig;
use crate::registry::{Outbox, RegistryHandle};

/// How long a client has to complete the WebSocket upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket relay server.
pub struct RelayServer {
    listener: TcpListener,

    /// Handle to the room registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating connection ids
    connection_counter: AtomicU64,

    outbound_queue_capacity: usize,
}

impl RelayServer {
    /// Binds the listener described by `config`.
    pub async fn bind(
        config: &RelayConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        Ok(Self {
            listener,
            registry,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            outbound_queue_capacity: config.outbound_queue_capacity,
        })
    }

    /// Returns the bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for every connection handler to leave its room.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Relay listening");

        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task failed");
                    }
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let n = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
                            handlers.spawn(self.handle_connection(stream, peer, ConnectionId::from_sequence(n)));
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        let open = handlers.len();
        if open > 0 {
            debug!(connections = open, "Waiting for connections to close");
        }
        while handlers.join_next().await.is_some() {}

        info!("Server stopped");
        Ok(())
    }

    /// Builds the task that upgrades and serves one connection.
    fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        connection_id: ConnectionId,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let registry = self.registry.clone();
        let shutdown = self.cancel_token.clone();
        let capacity = self.outbound_queue_capacity;

        async move {
            let ws = match timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!(peer = %peer, error = %e, "WebSocket handshake failed");
                    return;
                }
                Err(_) => {
                    warn!(peer = %peer, "WebSocket handshake timed out");
                    return;
                }
            };

            let cancel = shutdown.child_token();
            let (outbox, outbox_rx) = Outbox::channel(capacity, cancel.clone());

            ConnectionHandler::new(
                ws,
                peer,
                connection_id,
                registry,
                outbox,
                outbox_rx,
                cancel,
                shutdown,
            )
            .run()
            .await;
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}
