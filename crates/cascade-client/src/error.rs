//! Error types for the session client.
//!
//! Two layers:
//! - [`TransportError`]: what a [`Transport`](crate::transport::Transport)
//!   reports. `NotConnected` is the distinguished "link is down" condition.
//! - [`SessionError`]: what the session engine returns to callers.
//!   Connectivity failures are recoverable and trigger the reconnect loop;
//!   upstream broker errors are surfaced verbatim and never retried.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use thiserror::Error;

use crate::session::ConnectionState;

// ============================================================================
// Transport Error
// ============================================================================

/// Errors reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The link to the broker is down.
    #[error("not connected to broker")]
    NotConnected,

    /// Establishing the link failed (refused, unreachable, DNS).
    #[error("failed to connect to broker: {0}")]
    ConnectFailed(String),

    /// The broker rejected the request.
    #[error("broker error: {message}")]
    Remote {
        message: String,
        code: Option<String>,
    },

    /// The broker sent something the client could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Creates a remote error without a code.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
            code: None,
        }
    }

    /// Creates a protocol error from any error type.
    pub fn protocol<E: std::fmt::Display>(err: E) -> Self {
        Self::Protocol(err.to_string())
    }

    /// Returns true for failures caused by the link rather than the broker.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::NotConnected | Self::ConnectFailed(_))
    }
}

// ============================================================================
// Session Error
// ============================================================================

/// Errors returned by the session engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The broker link is down. A reconnect has been scheduled; retry later.
    #[error("not connected to broker")]
    NotConnected,

    /// The operation is not valid in the current connection state.
    #[error("{operation} requires {required} (currently {actual})")]
    InvalidState {
        operation: &'static str,
        required: ConnectionState,
        actual: ConnectionState,
    },

    /// Upstream transport or broker error, surfaced as-is.
    #[error(transparent)]
    Transport(TransportError),

    /// The session actor has shut down.
    #[error("session actor stopped")]
    ChannelClosed,
}

impl SessionError {
    /// Returns true if the reconnect loop should try again after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected => true,
            Self::Transport(e) => e.is_connectivity(),
            Self::InvalidState { .. } | Self::ChannelClosed => false,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
