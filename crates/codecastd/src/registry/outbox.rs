//! Per-connection outbound queue.
//!
//! The registry never writes to a socket. It pushes frames into each
//! member's bounded queue with `try_send`, so one slow reader can never
//! stall delivery to the rest of its room. When a queue is full or gone
//! the registry evicts the member by cancelling its token, which makes the
//! owning connection handler close the socket.

use codecast_protocol::RelayMessage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Sending side of a member's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,

    #[error("outbound queue is closed")]
    Closed,
}

impl Outbox {
    pub fn new(sender: mpsc::Sender<RelayMessage>, cancel: CancellationToken) -> Self {
        Self { sender, cancel }
    }

    /// Creates an outbox and the receiver its connection handler drains.
    pub fn channel(
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<RelayMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, cancel), rx)
    }

    /// Queues a frame without waiting.
    pub fn deliver(&self, message: RelayMessage) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Tells the owning connection to shut down.
    pub fn evict(&self) {
        self.cancel.cancel();
    }
}
