//! Registry actor commands, errors, and query results.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RemovalReason`: Why a member left its room
//! - `RoomSummary`: Per-room view returned by `ListRooms`

use codecast_core::{ConnectionId, DisplayName, Roster, RoomId};
use codecast_protocol::RelayMessage;
use thiserror::Error;
use tokio::sync::oneshot;

use super::outbox::Outbox;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
///
/// # Usage
///
/// ```ignore
/// let (tx, rx) = oneshot::channel();
/// registry_tx.send(RegistryCommand::GetRoster {
///     room_id: id,
///     respond_to: tx,
/// }).await?;
/// let roster = rx.await?;
/// ```
#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a connection to a room, creating the room if absent.
    ///
    /// On success `JOINED` is queued for every member, joiner included.
    ///
    /// # Errors
    /// - `RegistryError::AlreadyJoined` if the connection is in a room
    /// - `RegistryError::RoomFull` if the room is at capacity
    Join {
        connection_id: ConnectionId,
        room_id: RoomId,
        display_name: DisplayName,
        /// Queue the registry delivers this member's frames into
        outbox: Outbox,
        respond_to: oneshot::Sender<Result<Roster, RegistryError>>,
    },

    /// Remove a connection from its room.
    ///
    /// Responds `true` if the connection was a member. Leaving twice is a
    /// no-op that responds `false`.
    Leave {
        connection_id: ConnectionId,
        reason: RemovalReason,
        respond_to: oneshot::Sender<bool>,
    },

    /// Deliver a frame to every member of a room except the sender.
    ///
    /// Responds with the number of members the frame was queued for.
    ///
    /// # Errors
    /// - `RegistryError::NotJoined` if the sender has not joined any room
    Broadcast {
        room_id: RoomId,
        sender: ConnectionId,
        message: RelayMessage,
        respond_to: oneshot::Sender<Result<usize, RegistryError>>,
    },

    /// Deliver a frame to one member of the sender's room.
    ///
    /// Responds `false` when the target is unknown, in another room, or is
    /// the sender itself.
    ///
    /// # Errors
    /// - `RegistryError::NotJoined` if the sender has not joined any room
    SendTo {
        sender: ConnectionId,
        target: ConnectionId,
        message: RelayMessage,
        respond_to: oneshot::Sender<Result<bool, RegistryError>>,
    },

    /// Get the roster of a room, or `None` if the room does not exist.
    GetRoster {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<Roster>>,
    },

    /// List all rooms with their member counts.
    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomSummary>>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection is already a member of a room.
    #[error("already joined room {room_id}")]
    AlreadyJoined { room_id: RoomId },

    /// The room has reached its member limit.
    #[error("room {room_id} is full (max: {max} members)")]
    RoomFull { room_id: RoomId, max: usize },

    /// The connection has not joined a room yet.
    #[error("join a room first")]
    NotJoined,

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// Stable short code carried in `ERROR` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyJoined { .. } => "already_joined",
            Self::RoomFull { .. } => "room_full",
            Self::NotJoined => "not_joined",
            Self::ChannelClosed => "unavailable",
        }
    }
}

// ============================================================================
// Removal / Query Types
// ============================================================================

/// Reason a member was removed from its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Transport closed, failed to read, or timed out on write
    Closed,
    /// Outbound queue overflowed or was dropped
    SlowConsumer,
    /// Relay is shutting down
    Shutdown,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::SlowConsumer => "slow_consumer",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// One row of the room listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub member_count: usize,
}
