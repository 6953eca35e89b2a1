//! Connection handler for individual participant connections.
//!
//! Each WebSocket gets its own `ConnectionHandler` that:
//! - Announces the connection id with `CONNECTED`
//! - Decodes incoming frames and routes them to the registry
//! - Drains the connection's outbox onto the socket
//! - Leaves the room on close, error, eviction, or shutdown
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use codecast_core::{ConnectionId, RoomId};
use codecast_protocol::{
    decode_client_frame, encode_frame, ClientEvent, ProtocolError, RelayMessage,
};

use crate::registry::{Outbox, RegistryError, RegistryHandle, RemovalReason};

/// Write timeout (10 seconds)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Connection handler for a single participant.
pub struct ConnectionHandler {
    sink: WsSink,
    stream: WsStream,

    peer: SocketAddr,

    /// Identifier announced to the client in `CONNECTED`
    connection_id: ConnectionId,

    /// Handle to the room registry
    registry: RegistryHandle,

    /// Sending side of this connection's queue, handed to the registry on join
    outbox: Outbox,

    outbox_rx: mpsc::Receiver<RelayMessage>,

    /// Cancelled when the registry evicts this connection or the server stops
    cancel: CancellationToken,

    /// Server-wide shutdown token
    shutdown: CancellationToken,

    /// Room this connection joined, if any
    room_id: Option<RoomId>,
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ws: WebSocketStream<TcpStream>,
        peer: SocketAddr,
        connection_id: ConnectionId,
        registry: RegistryHandle,
        outbox: Outbox,
        outbox_rx: mpsc::Receiver<RelayMessage>,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink,
            stream,
            peer,
            connection_id,
            registry,
            outbox,
            outbox_rx,
            cancel,
            shutdown,
            room_id: None,
        }
    }

    /// Runs the connection until it closes.
    pub async fn run(mut self) {
        debug!(connection_id = %self.connection_id, peer = %self.peer, "Client connected");

        let reason = match self.send(&RelayMessage::connected(self.connection_id.clone())).await {
            Ok(()) => self.process_messages().await,
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Failed to send CONNECTED");
                RemovalReason::Closed
            }
        };

        if self.room_id.is_some() {
            self.registry.leave(self.connection_id.clone(), reason).await;
        }

        let _ = timeout(WRITE_TIMEOUT, self.sink.close()).await;

        info!(
            connection_id = %self.connection_id,
            room_id = ?self.room_id.as_ref().map(RoomId::as_str),
            reason = %reason,
            "Client disconnected"
        );
    }

    /// Main loop: socket frames in, outbox frames out.
    ///
    /// Returns why the connection ended.
    async fn process_messages(&mut self) -> RemovalReason {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return if self.shutdown.is_cancelled() {
                        RemovalReason::Shutdown
                    } else {
                        RemovalReason::SlowConsumer
                    };
                }

                Some(message) = self.outbox_rx.recv() => {
                    if let Err(e) = self.send(&message).await {
                        debug!(connection_id = %self.connection_id, error = %e, "Write failed");
                        return RemovalReason::Closed;
                    }
                }

                frame = self.stream.next() => {
                    let result = match frame {
                        Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                        Some(Ok(Message::Binary(_))) => {
                            self.send(&RelayMessage::error_with_code(
                                "Binary frames are not supported",
                                "binary_frame",
                            ))
                            .await
                        }
                        Some(Ok(Message::Ping(data))) => self.send_raw(Message::Pong(data)).await,
                        Some(Ok(Message::Close(_))) | None => return RemovalReason::Closed,
                        Some(Ok(_)) => Ok(()),
                        Some(Err(e)) => {
                            debug!(connection_id = %self.connection_id, error = %e, "Read failed");
                            return RemovalReason::Closed;
                        }
                    };

                    if let Err(e) = result {
                        debug!(connection_id = %self.connection_id, error = %e, "Closing connection");
                        return RemovalReason::Closed;
                    }
                }
            }
        }
    }

    /// Decodes and handles one text frame.
    async fn handle_text(&mut self, text: &str) -> Result<(), ConnectionError> {
        match decode_client_frame(text) {
            Ok(msg) => self.handle_event(msg.event).await,
            Err(ProtocolError::IncompatibleVersion { got, expected }) => {
                warn!(
                    connection_id = %self.connection_id,
                    client_version = %got,
                    relay_version = %expected,
                    "Protocol version mismatch"
                );
                self.send(&RelayMessage::rejected(format!(
                    "Protocol version {got} not compatible with relay version {expected}"
                )))
                .await?;
                Err(ConnectionError::VersionMismatch(got.to_string()))
            }
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Bad frame");
                self.send(&RelayMessage::error_with_code(e.to_string(), e.code()))
                    .await
            }
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) -> Result<(), ConnectionError> {
        let result = match event {
            ClientEvent::Join {
                room_id,
                display_name,
            } => self
                .registry
                .join(
                    self.connection_id.clone(),
                    room_id.clone(),
                    display_name,
                    self.outbox.clone(),
                )
                .await
                .map(|_| {
                    self.room_id = Some(room_id);
                }),

            ClientEvent::SyncCode { code, target } => {
                let message = RelayMessage::SyncCode {
                    code,
                    from: self.connection_id.clone(),
                };
                self.registry
                    .send_to(self.connection_id.clone(), target, message)
                    .await
                    .map(|_| ())
            }

            ClientEvent::CodeChange { room_id, code } => {
                let message = RelayMessage::CodeChange {
                    room_id: room_id.clone(),
                    code,
                    from: self.connection_id.clone(),
                };
                self.registry
                    .broadcast(room_id, self.connection_id.clone(), message)
                    .await
                    .map(|_| ())
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(RegistryError::ChannelClosed) => Err(ConnectionError::RegistryUnavailable),
            Err(e) => {
                debug!(connection_id = %self.connection_id, error = %e, "Request refused");
                self.send(&RelayMessage::error_with_code(e.to_string(), e.code()))
                    .await
            }
        }
    }

    async fn send(&mut self, message: &RelayMessage) -> Result<(), ConnectionError> {
        let json = encode_frame(message)?;
        self.send_raw(Message::Text(json.into())).await
    }

    async fn send_raw(&mut self, message: Message) -> Result<(), ConnectionError> {
        match timeout(WRITE_TIMEOUT, self.sink.send(message)).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Encode error: {0}")]
    Encode(#[from] ProtocolError),

    #[error("Incompatible protocol version {0}")]
    VersionMismatch(String),

    #[error("Registry unavailable")]
    RegistryUnavailable,
}
