//! Protocol message types for relay communication.

use crate::version::ProtocolVersion;
use codecast_core::{ConnectionId, DisplayName, Roster, RoomId};
use serde::{Deserialize, Serialize};

/// Events a participant sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    /// Request to join a room
    Join {
        room_id: RoomId,
        display_name: DisplayName,
    },

    /// Current buffer, addressed to one newcomer only
    SyncCode {
        code: String,
        /// Connection id of the participant that just joined
        target: ConnectionId,
    },

    /// Full-buffer replace, fanned out to the rest of the room
    CodeChange { room_id: RoomId, code: String },
}

/// Envelope for every frame sent by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl ClientMessage {
    /// Wraps an event with the current protocol version.
    pub fn new(event: ClientEvent) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            event,
        }
    }

    pub fn join(room_id: RoomId, display_name: DisplayName) -> Self {
        Self::new(ClientEvent::Join {
            room_id,
            display_name,
        })
    }

    pub fn sync_code(code: impl Into<String>, target: ConnectionId) -> Self {
        Self::new(ClientEvent::SyncCode {
            code: code.into(),
            target,
        })
    }

    pub fn code_change(room_id: RoomId, code: impl Into<String>) -> Self {
        Self::new(ClientEvent::CodeChange {
            room_id,
            code: code.into(),
        })
    }
}

impl From<ClientEvent> for ClientMessage {
    fn from(event: ClientEvent) -> Self {
        Self::new(event)
    }
}

/// Messages sent from the relay to participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayMessage {
    /// Transport accepted; first frame on every connection
    Connected {
        protocol_version: ProtocolVersion,
        /// Identifier assigned to this connection
        connection_id: ConnectionId,
    },

    /// Frame refused because of a protocol version mismatch
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// Membership changed by a join; sent to every member including the joiner
    Joined {
        roster: Roster,
        display_name: DisplayName,
        connection_id: ConnectionId,
    },

    /// Buffer content pushed by an existing member to this newcomer
    SyncCode { code: String, from: ConnectionId },

    /// Another member replaced the buffer
    CodeChange {
        room_id: RoomId,
        code: String,
        from: ConnectionId,
    },

    /// Membership changed by a leave
    Disconnected {
        connection_id: ConnectionId,
        display_name: DisplayName,
    },

    /// Request could not be processed
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl RelayMessage {
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }

    /// Short name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "CONNECTED",
            Self::Rejected { .. } => "REJECTED",
            Self::Joined { .. } => "JOINED",
            Self::SyncCode { .. } => "SYNC_CODE",
            Self::CodeChange { .. } => "CODE_CHANGE",
            Self::Disconnected { .. } => "DISCONNECTED",
            Self::Error { .. } => "ERROR",
        }
    }
}
