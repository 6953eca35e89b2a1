//! Error types for the codecast client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside of tests.

use codecast_core::DomainError;
use thiserror::Error;

use crate::session::SessionState;

// ============================================================================
// Session Errors
// ============================================================================

/// Errors raised by the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Room id or display name failed local validation.
    #[error(transparent)]
    InvalidJoin(#[from] DomainError),

    /// `begin_join` was called while a session is already active.
    #[error("Session already active ({0:?})")]
    AlreadyActive(SessionState),
}

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors that end a relay session.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Join rejected before anything was sent.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Could not reach the relay.
    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    /// The relay refused this client.
    #[error("Relay rejected the session: {0}")]
    Rejected(String),

    /// WebSocket failure after connecting.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay closed the connection unexpectedly.
    #[error("Connection to relay lost")]
    ConnectionLost,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
