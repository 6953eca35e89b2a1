//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor. Channel errors are mapped to
//! `RegistryError::ChannelClosed`.

use tokio::sync::{mpsc, oneshot};

use codecast_core::{ConnectionId, DisplayName, Roster, RoomId};
use codecast_protocol::RelayMessage;

use super::commands::{RegistryCommand, RegistryError, RemovalReason, RoomSummary};
use super::outbox::Outbox;

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// The relay builds one at startup and gives a clone to every
/// connection handler.
///
/// # Usage
///
/// ```ignore
/// let roster = handle.join(conn_id, room_id, name, outbox).await?;
/// handle.broadcast(room_id, conn_id, message).await?;
/// handle.leave(conn_id, RemovalReason::Closed).await;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Adds a connection to a room and returns the updated roster.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyJoined` if the connection is in a room
    /// - `RegistryError::RoomFull` if the room is at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn join(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        display_name: DisplayName,
        outbox: Outbox,
    ) -> Result<Roster, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Join {
                connection_id,
                room_id,
                display_name,
                outbox,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a connection from its room.
    ///
    /// Returns `true` if it was a member. Never fails: a stopped actor has
    /// no rooms left to leave.
    pub async fn leave(&self, connection_id: ConnectionId, reason: RemovalReason) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Leave {
                connection_id,
                reason,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Delivers `message` to every other member of `room_id`.
    ///
    /// Returns how many members it was queued for.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        sender: ConnectionId,
        message: RelayMessage,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Broadcast {
                room_id,
                sender,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Delivers `message` to one member of the sender's room.
    pub async fn send_to(
        &self,
        sender: ConnectionId,
        target: ConnectionId,
        message: RelayMessage,
    ) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendTo {
                sender,
                target,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Get the roster of a room.
    ///
    /// Returns `None` if the room doesn't exist or if communication
    /// with the actor fails.
    pub async fn get_roster(&self, room_id: RoomId) -> Option<Roster> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::GetRoster {
                room_id,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// List all rooms.
    ///
    /// Returns an empty vector if there are no rooms or if communication
    /// with the actor fails.
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListRooms { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }
}
