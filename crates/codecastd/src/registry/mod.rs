//! Room registry using Actor pattern.
//!
//! The registry is the only component allowed to change room membership.
//! It receives commands via a tokio mpsc channel and pushes outgoing frames
//! into per-connection outboxes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryActor  │────▶│ Outbox (per     │
//! │  (per socket)   │     │                 │     │ member, bounded)│
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   try_send            │
//!         │   (mpsc channel)      │                       │
//!         ▼                       ▼                       ▼
//!    Join/Leave/             HashMap<RoomId, Room>   socket writer of
//!    Broadcast/SendTo        HashMap<ConnId, Member> each member
//! ```

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;
mod outbox;

pub use actor::{RegistryActor, MAX_MEMBERS_PER_ROOM};
pub use commands::{RegistryCommand, RegistryError, RemovalReason, RoomSummary};
pub use handle::RegistryHandle;
pub use outbox::{DeliveryError, Outbox};

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// # Example
///
/// ```no_run
/// use codecastd::registry::{spawn_registry, MAX_MEMBERS_PER_ROOM};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(MAX_MEMBERS_PER_ROOM);
///     let rooms = handle.list_rooms().await;
///     assert!(rooms.is_empty());
/// }
/// ```
pub fn spawn_registry(max_members_per_room: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = RegistryActor::new(cmd_rx, max_members_per_room);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx)
}
