//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when building domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Room identifier was empty or whitespace
    #[error("Room ID is required")]
    EmptyRoomId,

    /// Display name was empty or whitespace
    #[error("Display name is required")]
    EmptyDisplayName,

    /// Display name exceeded the length limit
    #[error("Display name is too long: {len} characters (max: {max})")]
    DisplayNameTooLong { len: usize, max: usize },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
