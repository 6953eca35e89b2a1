//! How incoming buffer content is applied to the local replica.
//!
//! The relay only forwards whole buffers. What a replica does with one is
//! decided here, so a smarter strategy can be dropped in without touching
//! the relay or the session state machine.

/// Decides the new local buffer when remote content arrives.
pub trait MergeStrategy: Send + Sync {
    /// Returns the replacement buffer, or `None` to keep `local` as is.
    fn merge(&self, local: &str, incoming: &str) -> Option<String>;
}

/// Last applied wins: take the incoming buffer whenever it differs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceOnChange;

impl MergeStrategy for ReplaceOnChange {
    fn merge(&self, local: &str, incoming: &str) -> Option<String> {
        (local != incoming).then(|| incoming.to_string())
    }
}
