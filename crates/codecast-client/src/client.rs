//! WebSocket driver for a `SessionController`.
//!
//! `RelayClient` owns the connection to the relay. It feeds incoming frames
//! and local commands to the controller, performs the resulting effects,
//! and reports what the UI should show as `SessionUpdate`s.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use codecast_core::Roster;
use codecast_protocol::{decode_relay_frame, encode_frame};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::merge::{MergeStrategy, ReplaceOnChange};
use crate::session::{Effect, Notification, SessionController, SessionState};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// ============================================================================
// Channels
// ============================================================================

/// Input from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// The editor content changed
    Edit(String),
    /// Leave the room and close the connection
    Leave,
}

/// Output to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Remote content replaced the local buffer
    Buffer(String),
    Roster(Roster),
    Notice(Notification),
    /// Return to the landing view
    Redirect,
    /// The driver has stopped
    Closed,
}

// ============================================================================
// Relay Client
// ============================================================================

/// Runs one room session over a WebSocket.
pub struct RelayClient<M: MergeStrategy = ReplaceOnChange> {
    config: ClientConfig,
    controller: SessionController<M>,
    update_tx: mpsc::UnboundedSender<SessionUpdate>,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    cancel_token: CancellationToken,
}

/// Why the message loop stopped.
enum LoopExit {
    /// Leave requested or cancelled
    Left,
    /// Controller dropped to `Disconnected` with this message
    Aborted(String),
    /// The relay went away, with the socket error if there was one
    TransportClosed(Option<tungstenite::Error>),
}

impl<M: MergeStrategy> RelayClient<M> {
    #[must_use]
    pub fn new(
        config: ClientConfig,
        controller: SessionController<M>,
        update_tx: mpsc::UnboundedSender<SessionUpdate>,
        command_rx: mpsc::UnboundedReceiver<ClientCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            controller,
            update_tx,
            command_rx,
            cancel_token,
        }
    }

    /// Joins `room_id` as `display_name` and runs until the session ends.
    ///
    /// Returns `Ok(())` after an explicit leave or cancellation. Every other
    /// ending has already been reported to the UI as a notice and redirect.
    pub async fn run(&mut self, room_id: &str, display_name: &str) -> Result<()> {
        let result = self.run_session(room_id, display_name).await;
        self.emit(SessionUpdate::Closed);
        result
    }

    async fn run_session(&mut self, room_id: &str, display_name: &str) -> Result<()> {
        if let Err(e) = self.controller.begin_join(room_id, display_name) {
            let effects = self.controller.abort(e.to_string());
            self.apply_local(effects);
            return Err(e.into());
        }

        info!(server = %self.config.server_url, room_id, "Connecting to relay");

        let ws = match timeout(
            self.config.connect_timeout,
            connect_async(self.config.server_url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => {
                let effects = self.controller.transport_closed();
                self.apply_local(effects);
                return Err(ClientError::Connect(e.to_string()));
            }
            Err(_) => {
                let effects = self.controller.transport_closed();
                self.apply_local(effects);
                return Err(ClientError::Connect("timed out".to_string()));
            }
        };

        let (mut sink, mut stream) = ws.split();

        let exit = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Relay client cancelled");
                    self.controller.leave();
                    break LoopExit::Left;
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(ClientCommand::Edit(code)) => {
                            let effects = self.controller.local_edit(code);
                            if let Some(exit) = self.apply(&mut sink, effects).await {
                                break exit;
                            }
                        }
                        Some(ClientCommand::Leave) | None => {
                            self.controller.leave();
                            break LoopExit::Left;
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let message = match decode_relay_frame(text.as_str()) {
                                Ok(m) => m,
                                Err(e) => {
                                    warn!(error = %e, "Ignoring undecodable relay frame");
                                    continue;
                                }
                            };
                            debug!(kind = message.kind(), "Relay frame");
                            let effects = self.controller.handle(message);
                            if let Some(exit) = self.apply(&mut sink, effects).await {
                                break exit;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break LoopExit::TransportClosed(None),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "Relay connection error");
                            break LoopExit::TransportClosed(Some(e));
                        }
                    }
                }
            }
        };

        if let Err(e) = sink.close().await {
            debug!(error = %e, "Error closing relay connection");
        }

        match exit {
            LoopExit::Left => {
                let effects = self.controller.transport_closed();
                self.apply_local(effects);
                info!("Left room");
                Ok(())
            }
            LoopExit::Aborted(message) => Err(ClientError::Rejected(message)),
            LoopExit::TransportClosed(error) => {
                let effects = self.controller.transport_closed();
                self.apply_local(effects);
                Err(error.map_or(ClientError::ConnectionLost, ClientError::WebSocket))
            }
        }
    }

    /// Performs effects, sending frames on `sink`.
    ///
    /// Returns an exit when the controller asked for a redirect or the
    /// relay could not be written to.
    async fn apply(&mut self, sink: &mut WsSink, effects: Vec<Effect>) -> Option<LoopExit> {
        let mut aborted: Option<String> = None;

        for effect in effects {
            match effect {
                Effect::Send(message) => {
                    let frame = match encode_frame(&message) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode client frame");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        warn!(error = %e, "Failed to send to relay");
                        return Some(LoopExit::TransportClosed(Some(e)));
                    }
                }
                Effect::Notify(notification) => {
                    if self.controller.state() == SessionState::Disconnected {
                        aborted = Some(notification.message.clone());
                    }
                    self.emit(SessionUpdate::Notice(notification));
                }
                other => self.apply_ui(other),
            }
        }

        aborted.map(LoopExit::Aborted)
    }

    /// Performs effects when no connection is open.
    fn apply_local(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(message) => debug!(?message, "Dropping frame, no connection"),
                Effect::Notify(notification) => self.emit(SessionUpdate::Notice(notification)),
                other => self.apply_ui(other),
            }
        }
    }

    fn apply_ui(&self, effect: Effect) {
        match effect {
            Effect::BufferReplaced(code) => self.emit(SessionUpdate::Buffer(code)),
            Effect::RosterChanged => self.emit(SessionUpdate::Roster(self.controller.roster().clone())),
            Effect::Redirect => self.emit(SessionUpdate::Redirect),
            Effect::Notify(notification) => self.emit(SessionUpdate::Notice(notification)),
            Effect::Send(_) => {}
        }
    }

    fn emit(&self, update: SessionUpdate) {
        // UI may already be gone during shutdown
        let _ = self.update_tx.send(update);
    }
}
