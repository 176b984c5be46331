//! Session actor commands and the snapshot it hands back.
//!
//! Each command carries a oneshot channel for the response, so callers can
//! await completion without blocking the actor.

use tokio::sync::oneshot;

use cascade_core::SubjectSet;

use super::state::{ConnectionState, SessionState};
use crate::error::SessionError;

/// Response channel carried by each command.
pub type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Commands sent to the session actor.
#[derive(Debug)]
pub enum SessionCommand {
    /// Bring the link up.
    Connect { respond_to: Reply<()> },

    /// Log in and run the bootstrap sequence. Requires `Connected`.
    Login { respond_to: Reply<()> },

    /// One connect-then-login attempt, issued by the reconnect loop.
    Reconnect { respond_to: Reply<()> },

    /// Start the reconnect loop unless it is already running or the
    /// session is logged in. Fire-and-forget.
    ScheduleReconnect,

    StartCascading { respond_to: Reply<()> },

    StopCascading { respond_to: Reply<()> },

    /// Announce subjects. `force` resends all of them.
    AddSubjects {
        subjects: SubjectSet,
        force: bool,
        respond_to: Reply<()>,
    },

    /// Withdraw subjects.
    RemoveSubjects {
        subjects: SubjectSet,
        respond_to: Reply<()>,
    },

    /// Read the current session state.
    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub connection: ConnectionState,
    pub cascading: bool,
    pub desired_subjects: SubjectSet,
    pub acknowledged_subjects: SubjectSet,
}

impl From<&SessionState> for SessionSnapshot {
    fn from(state: &SessionState) -> Self {
        Self {
            connection: state.connection,
            cascading: state.cascading,
            desired_subjects: state.desired_subjects.clone(),
            acknowledged_subjects: state.acknowledged_subjects.clone(),
        }
    }
}
