//! Participant session state machine.
//!
//! `SessionController` holds one participant's view of a room: its state,
//! its own connection id, the roster, and the local buffer replica. It
//! never touches the network. Callers feed it relay frames and local
//! edits, and it answers with `Effect`s for the transport and the UI.
//!
//! ```text
//! Disconnected ──begin_join──▶ Joining ──own JOINED──▶ Joined
//!      ▲                          │                      │
//!      │        abort / transport failure / REJECTED     │ leave
//!      └──────────────────────────┴──────── Leaving ◀────┘
//! ```

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use codecast_core::{ConnectionId, DisplayName, Roster, RoomId};
use codecast_protocol::{ClientMessage, ProtocolVersion, RelayMessage};

use crate::error::SessionError;
use crate::merge::{MergeStrategy, ReplaceOnChange};

/// Message shown when the transport drops.
pub const CONNECTION_FAILED: &str = "Socket connection failed, Try again later";

/// Where the participant is in the room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Joining,
    Joined,
    Leaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Error,
}

/// A user-visible toast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Work the controller asks its driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send this frame to the relay
    Send(ClientMessage),
    /// The local buffer now holds this content; redraw the editor
    BufferReplaced(String),
    /// The roster changed; redraw the member list
    RosterChanged,
    Notify(Notification),
    /// Leave the room view
    Redirect,
}

/// One participant's session in a room.
pub struct SessionController<M: MergeStrategy = ReplaceOnChange> {
    state: SessionState,
    room_id: Option<RoomId>,
    display_name: Option<DisplayName>,
    /// Assigned by the relay in `CONNECTED`
    connection_id: Option<ConnectionId>,
    roster: Roster,
    buffer: String,
    merge: M,
}

impl SessionController<ReplaceOnChange> {
    pub fn new() -> Self {
        Self::with_merge(ReplaceOnChange)
    }
}

impl Default for SessionController<ReplaceOnChange> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MergeStrategy> SessionController<M> {
    pub fn with_merge(merge: M) -> Self {
        Self {
            state: SessionState::Disconnected,
            room_id: None,
            display_name: None,
            connection_id: None,
            roster: Roster::new(),
            buffer: String::new(),
            merge,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.room_id.as_ref()
    }

    pub fn display_name(&self) -> Option<&DisplayName> {
        self.display_name.as_ref()
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection_id.as_ref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Validates the join request and enters `Joining`.
    ///
    /// The `JOIN` frame itself goes out once the relay announces our id.
    /// The buffer starts empty; an existing member's `SYNC_CODE` fills it.
    /// On error the controller stays `Disconnected`; pass the error text to
    /// [`abort`](Self::abort) to get the notification and redirect.
    pub fn begin_join(&mut self, room_id: &str, display_name: &str) -> Result<(), SessionError> {
        if self.state != SessionState::Disconnected {
            return Err(SessionError::AlreadyActive(self.state));
        }

        let room_id = RoomId::parse(room_id)?;
        let display_name = DisplayName::parse(display_name)?;

        debug!(room_id = %room_id, display_name = %display_name, "Joining room");
        self.room_id = Some(room_id);
        self.display_name = Some(display_name);
        self.connection_id = None;
        self.roster = Roster::new();
        self.buffer.clear();
        self.state = SessionState::Joining;
        Ok(())
    }

    /// Handles one frame from the relay.
    pub fn handle(&mut self, message: RelayMessage) -> Vec<Effect> {
        match message {
            RelayMessage::Connected {
                protocol_version,
                connection_id,
            } => self.on_connected(protocol_version, connection_id),

            RelayMessage::Rejected { reason, .. } => self.abort(reason),

            RelayMessage::Joined {
                roster,
                display_name,
                connection_id,
            } => self.on_joined(roster, display_name, connection_id),

            RelayMessage::SyncCode { code, from } => {
                if !self.is_active() {
                    return Vec::new();
                }
                debug!(from = %from, "Received buffer sync");
                self.apply_remote(&code)
            }

            RelayMessage::CodeChange { room_id, code, .. } => {
                if self.state != SessionState::Joined || self.room_id.as_ref() != Some(&room_id) {
                    return Vec::new();
                }
                self.apply_remote(&code)
            }

            RelayMessage::Disconnected {
                connection_id,
                display_name,
            } => {
                if !self.is_active() {
                    return Vec::new();
                }
                self.roster.remove(&connection_id);
                vec![
                    Effect::RosterChanged,
                    Effect::Notify(Notification::info(format!("{display_name} left the room"))),
                ]
            }

            RelayMessage::Error { message, .. } => {
                if self.state == SessionState::Joining {
                    // The only request in flight is our JOIN
                    self.abort(message)
                } else {
                    vec![Effect::Notify(Notification::error(message))]
                }
            }
        }
    }

    /// Applies a keystroke-level edit: local first, then tell the room.
    ///
    /// Edits are only accepted once `Joined`. Before that the room's content
    /// is still on its way in `SYNC_CODE`, and a draft sent alongside it would
    /// leave the newcomer and the room with different buffers, so it is
    /// dropped.
    pub fn local_edit(&mut self, code: impl Into<String>) -> Vec<Effect> {
        if self.state != SessionState::Joined {
            debug!(state = ?self.state, "Dropping edit made outside a joined room");
            return Vec::new();
        }
        let Some(room_id) = self.room_id.clone() else {
            return Vec::new();
        };

        self.buffer = code.into();
        vec![Effect::Send(ClientMessage::code_change(room_id, self.buffer.clone()))]
    }

    /// Starts an explicit exit. The driver closes the transport next.
    pub fn leave(&mut self) {
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Leaving;
        }
    }

    /// The transport closed. Expected while leaving, a failure otherwise.
    pub fn transport_closed(&mut self) -> Vec<Effect> {
        match self.state {
            SessionState::Leaving => {
                self.reset();
                Vec::new()
            }
            SessionState::Disconnected => Vec::new(),
            SessionState::Joining | SessionState::Joined => self.abort(CONNECTION_FAILED),
        }
    }

    /// Drops to `Disconnected` with an error notification and a redirect.
    pub fn abort(&mut self, message: impl Into<String>) -> Vec<Effect> {
        let message = message.into();
        info!(room_id = ?self.room_id.as_ref().map(RoomId::as_str), reason = %message, "Session aborted");
        self.reset();
        vec![Effect::Notify(Notification::error(message)), Effect::Redirect]
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    fn on_connected(
        &mut self,
        protocol_version: ProtocolVersion,
        connection_id: ConnectionId,
    ) -> Vec<Effect> {
        if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
            return self.abort(format!(
                "Protocol version mismatch (client: {}, relay: {protocol_version})",
                ProtocolVersion::CURRENT
            ));
        }

        if self.state != SessionState::Joining {
            return Vec::new();
        }

        let (Some(room_id), Some(display_name)) = (&self.room_id, &self.display_name) else {
            return Vec::new();
        };

        debug!(connection_id = %connection_id, "Relay assigned connection id");
        self.connection_id = Some(connection_id);

        vec![Effect::Send(ClientMessage::join(room_id.clone(), display_name.clone()))]
    }

    fn on_joined(
        &mut self,
        roster: Roster,
        display_name: DisplayName,
        connection_id: ConnectionId,
    ) -> Vec<Effect> {
        if !self.is_active() {
            return Vec::new();
        }

        self.roster = roster;
        let mut effects = vec![Effect::RosterChanged];

        if self.connection_id.as_ref() == Some(&connection_id) {
            if self.state == SessionState::Joining {
                info!(connection_id = %connection_id, members = self.roster.len(), "Joined room");
                self.state = SessionState::Joined;
            }
            return effects;
        }

        effects.push(Effect::Notify(Notification::info(format!(
            "{display_name} joined the room."
        ))));

        // Bring the newcomer up to date with our replica
        if self.state == SessionState::Joined {
            effects.push(Effect::Send(ClientMessage::sync_code(
                self.buffer.clone(),
                connection_id,
            )));
        }

        effects
    }

    fn apply_remote(&mut self, incoming: &str) -> Vec<Effect> {
        match self.merge.merge(&self.buffer, incoming) {
            Some(merged) => {
                self.buffer = merged.clone();
                vec![Effect::BufferReplaced(merged)]
            }
            None => Vec::new(),
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Joining | SessionState::Joined)
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.connection_id = None;
        self.roster = Roster::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecast_core::Participant;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::new(s)
    }

    fn name(s: &str) -> DisplayName {
        DisplayName::parse(s).unwrap()
    }

    fn room(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn roster(members: &[(&str, &str)]) -> Roster {
        members
            .iter()
            .map(|(c, n)| Participant::new(id(c), name(n)))
            .collect()
    }

    /// Controller that has joined `R1` as `conn-1`/alice.
    fn joined_controller() -> SessionController {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();
        s.handle(RelayMessage::connected(id("conn-1")));
        s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice")]),
            display_name: name("alice"),
            connection_id: id("conn-1"),
        });
        assert_eq!(s.state(), SessionState::Joined);
        s
    }

    fn notifications(effects: &[Effect]) -> Vec<&str> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(n) => Some(n.message.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_join_sent_after_connected() {
        let mut s = SessionController::new();
        s.begin_join("R1", " alice ").unwrap();
        assert_eq!(s.state(), SessionState::Joining);

        let effects = s.handle(RelayMessage::connected(id("conn-1")));
        assert_eq!(
            effects,
            vec![Effect::Send(ClientMessage::join(room("R1"), name("alice")))]
        );
        assert_eq!(s.connection_id(), Some(&id("conn-1")));
    }

    #[test]
    fn test_own_joined_completes_join_without_sync() {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();
        s.handle(RelayMessage::connected(id("conn-1")));

        let effects = s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice")]),
            display_name: name("alice"),
            connection_id: id("conn-1"),
        });

        assert_eq!(effects, vec![Effect::RosterChanged]);
        assert_eq!(s.state(), SessionState::Joined);
        assert_eq!(s.roster().len(), 1);
    }

    #[test]
    fn test_malformed_join_stays_disconnected() {
        let mut s = SessionController::new();

        let err = s.begin_join("R1", "   ").unwrap_err();
        assert_eq!(s.state(), SessionState::Disconnected);

        let effects = s.abort(err.to_string());
        assert_eq!(notifications(&effects), vec!["Display name is required"]);
        assert_eq!(effects.last(), Some(&Effect::Redirect));

        assert!(s.begin_join("", "bob").is_err());
    }

    #[test]
    fn test_begin_join_twice_rejected() {
        let mut s = joined_controller();
        assert_eq!(
            s.begin_join("R2", "alice"),
            Err(SessionError::AlreadyActive(SessionState::Joined))
        );
    }

    #[test]
    fn test_newcomer_gets_sync_and_notification() {
        let mut s = joined_controller();
        s.local_edit("x=1");

        let effects = s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice"), ("conn-2", "bob")]),
            display_name: name("bob"),
            connection_id: id("conn-2"),
        });

        assert_eq!(notifications(&effects), vec!["bob joined the room."]);
        assert!(effects.contains(&Effect::RosterChanged));
        assert!(effects.contains(&Effect::Send(ClientMessage::sync_code("x=1", id("conn-2")))));
        assert_eq!(s.roster().len(), 2);
    }

    #[test]
    fn test_newcomer_converges_from_sync() {
        let mut s = SessionController::new();
        s.begin_join("R1", "bob").unwrap();
        s.handle(RelayMessage::connected(id("conn-2")));
        s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice"), ("conn-2", "bob")]),
            display_name: name("bob"),
            connection_id: id("conn-2"),
        });

        let effects = s.handle(RelayMessage::SyncCode {
            code: "x=1".to_string(),
            from: id("conn-1"),
        });
        assert_eq!(effects, vec![Effect::BufferReplaced("x=1".to_string())]);
        assert_eq!(s.buffer(), "x=1");
    }

    #[test]
    fn test_code_change_applied_only_when_different() {
        let mut s = joined_controller();

        let change = |code: &str| RelayMessage::CodeChange {
            room_id: room("R1"),
            code: code.to_string(),
            from: id("conn-2"),
        };

        assert_eq!(
            s.handle(change("print(1)")),
            vec![Effect::BufferReplaced("print(1)".to_string())]
        );
        assert!(s.handle(change("print(1)")).is_empty());

        // Another room's change is ignored
        let other = RelayMessage::CodeChange {
            room_id: room("R2"),
            code: "nope".to_string(),
            from: id("conn-9"),
        };
        assert!(s.handle(other).is_empty());
        assert_eq!(s.buffer(), "print(1)");
    }

    #[test]
    fn test_local_edit_is_local_first() {
        let mut s = joined_controller();

        let effects = s.local_edit("print(2)");
        assert_eq!(s.buffer(), "print(2)");
        assert_eq!(
            effects,
            vec![Effect::Send(ClientMessage::code_change(room("R1"), "print(2)"))]
        );
    }

    #[test]
    fn test_edit_before_join_is_dropped() {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();
        s.handle(RelayMessage::connected(id("conn-1")));

        assert!(s.local_edit("draft").is_empty());
        assert_eq!(s.buffer(), "");

        let effects = s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice")]),
            display_name: name("alice"),
            connection_id: id("conn-1"),
        });
        assert_eq!(effects, vec![Effect::RosterChanged]);
        assert_eq!(s.buffer(), "");
    }

    #[test]
    fn test_rejoin_starts_with_empty_buffer() {
        let mut s = joined_controller();
        s.local_edit("secret from R1");
        s.transport_closed();

        s.begin_join("R2", "alice").unwrap();
        assert_eq!(s.buffer(), "");
        s.handle(RelayMessage::connected(id("conn-5")));
        s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-5", "alice")]),
            display_name: name("alice"),
            connection_id: id("conn-5"),
        });
        assert_eq!(s.buffer(), "");

        // A newcomer to R2 is synced with R2's content, not R1's
        let effects = s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-5", "alice"), ("conn-6", "bob")]),
            display_name: name("bob"),
            connection_id: id("conn-6"),
        });
        assert!(effects.contains(&Effect::Send(ClientMessage::sync_code("", id("conn-6")))));
    }

    #[test]
    fn test_disconnected_updates_roster() {
        let mut s = joined_controller();
        s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice"), ("conn-2", "bob")]),
            display_name: name("bob"),
            connection_id: id("conn-2"),
        });

        let effects = s.handle(RelayMessage::Disconnected {
            connection_id: id("conn-2"),
            display_name: name("bob"),
        });

        assert_eq!(notifications(&effects), vec!["bob left the room"]);
        assert_eq!(s.roster().connection_ids(), vec![id("conn-1")]);
    }

    #[test]
    fn test_error_while_joining_aborts() {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();
        s.handle(RelayMessage::connected(id("conn-1")));

        let effects = s.handle(RelayMessage::error_with_code("room R1 is full", "room_full"));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(notifications(&effects), vec!["room R1 is full"]);
        assert!(effects.contains(&Effect::Redirect));
    }

    #[test]
    fn test_error_while_joined_only_notifies() {
        let mut s = joined_controller();
        let effects = s.handle(RelayMessage::error("something odd"));
        assert_eq!(s.state(), SessionState::Joined);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_rejected_redirects() {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();

        let effects = s.handle(RelayMessage::rejected("version"));
        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(effects.last(), Some(&Effect::Redirect));
    }

    #[test]
    fn test_incompatible_relay_version_aborts() {
        let mut s = SessionController::new();
        s.begin_join("R1", "alice").unwrap();

        let effects = s.handle(RelayMessage::Connected {
            protocol_version: ProtocolVersion::new(2, 0),
            connection_id: id("conn-1"),
        });
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(effects.contains(&Effect::Redirect));
    }

    #[test]
    fn test_transport_failure_vs_leave() {
        let mut s = joined_controller();
        let effects = s.transport_closed();
        assert_eq!(notifications(&effects), vec![CONNECTION_FAILED]);
        assert_eq!(effects.last(), Some(&Effect::Redirect));
        assert_eq!(s.state(), SessionState::Disconnected);

        let mut s = joined_controller();
        s.leave();
        assert_eq!(s.state(), SessionState::Leaving);
        assert!(s.transport_closed().is_empty());
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_custom_merge_strategy() {
        struct KeepLocal;
        impl MergeStrategy for KeepLocal {
            fn merge(&self, _local: &str, _incoming: &str) -> Option<String> {
                None
            }
        }

        let mut s = SessionController::with_merge(KeepLocal);
        s.begin_join("R1", "alice").unwrap();
        s.handle(RelayMessage::connected(id("conn-1")));
        s.handle(RelayMessage::Joined {
            roster: roster(&[("conn-1", "alice")]),
            display_name: name("alice"),
            connection_id: id("conn-1"),
        });
        s.local_edit("mine");

        let effects = s.handle(RelayMessage::CodeChange {
            room_id: room("R1"),
            code: "theirs".to_string(),
            from: id("conn-2"),
        });
        assert!(effects.is_empty());
        assert_eq!(s.buffer(), "mine");
    }
}
