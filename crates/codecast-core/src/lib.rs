//! Codecast Core - Shared types for real-time code rooms
//!
//! This crate provides the domain types shared between
//! the relay daemon (codecastd) and participant clients.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod id;
pub mod roster;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use id::{ConnectionId, DisplayName, RoomId, MAX_DISPLAY_NAME_LEN};
pub use roster::{Participant, Roster};
