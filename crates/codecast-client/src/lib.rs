//! Codecast client - participant side of a shared code room
//!
//! # Architecture
//!
//! The client is split so the state machine can be tested without a
//! network:
//!
//! 1. **SessionController**: pure state machine. Relay frames and local
//!    edits go in, `Effect`s come out.
//! 2. **RelayClient**: owns the WebSocket, feeds frames to the controller
//!    and performs its effects, reporting to the UI via `SessionUpdate`s.
//! 3. **Compile collaborator**: `Compiler` trait + `OutputPane`, independent
//!    of the room connection.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod client;
pub mod compile;
pub mod config;
pub mod error;
pub mod merge;
pub mod session;

// Re-export commonly used types
pub use client::{ClientCommand, RelayClient, SessionUpdate};
pub use compile::{CompileError, Compiler, HttpCompiler, OutputPane};
pub use config::ClientConfig;
pub use error::{ClientError, Result, SessionError};
pub use merge::{MergeStrategy, ReplaceOnChange};
pub use session::{Effect, Notification, NotificationLevel, SessionController, SessionState};
