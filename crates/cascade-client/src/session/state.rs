//! Session state owned by the session actor.

use std::fmt;

use cascade_core::SubjectSet;

/// Where the session is in its connection lifecycle.
///
/// `Disconnected` is initial. Any state falls back to `Disconnected` on a
/// connectivity failure; there is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    LoggedIn,
}

impl ConnectionState {
    /// Returns true once the link is up, logged in or not.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::LoggedIn)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::LoggedIn => write!(f, "logged in"),
        }
    }
}

/// Local intent plus what the broker was last told.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Subjects the local user wants to advertise.
    pub desired_subjects: SubjectSet,

    /// Subjects the broker confirmed since the current login.
    ///
    /// Reported through snapshots only. What gets sent is always decided
    /// from `desired_subjects`, and restore resends all of them because a
    /// fresh broker session starts empty.
    pub acknowledged_subjects: SubjectSet,

    /// Whether the local user is offering help at all.
    pub cascading: bool,

    pub connection: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = SessionState::default();
        assert_eq!(state.connection, ConnectionState::Disconnected);
        assert!(!state.cascading);
        assert!(state.desired_subjects.is_empty());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::LoggedIn.to_string(), "logged in");
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }
}
