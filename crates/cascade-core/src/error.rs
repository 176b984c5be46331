//! Registry error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in peer directory operations.
///
/// None of these are fatal. `PeerNotFound` is expected when the broker
/// reports on the local user, who is never stored in the directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Peer not present in the directory
    #[error("peer not found: {username}")]
    PeerNotFound { username: String },

    /// A username lookup was combined with other filters
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

impl RegistryError {
    /// Creates a not-found error for `username`.
    pub fn not_found(username: impl Into<String>) -> Self {
        Self::PeerNotFound {
            username: username.into(),
        }
    }

    /// Returns true if this is a lookup miss.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PeerNotFound { .. })
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
