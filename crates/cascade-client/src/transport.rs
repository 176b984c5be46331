//! The transport seam between the session engine and the broker.
//!
//! A transport provides request/response calls plus a stream of push
//! notifications. The push stream is handed to the session engine at spawn
//! time as an `mpsc::Receiver<PushEvent>`; only the engine ever calls the
//! methods below. A transport that notices the link drop on its own reports
//! it as [`PushEvent::LinkLost`].

use async_trait::async_trait;

use cascade_core::{CascaderRecord, Subject, SubjectSet};

use crate::error::TransportError;

/// Opaque token returned by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginToken(String);

impl LoginToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A user asking cascaders for help, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelpRequest {
    pub id: String,
    pub username: String,
    pub host: String,
    pub subject: Subject,
    pub description: String,
}

/// Unsolicited notifications from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    PeerJoined {
        username: String,
        host: String,
        subjects: SubjectSet,
    },
    PeerLeft {
        username: String,
    },
    PeerAddedSubjects {
        username: String,
        subjects: SubjectSet,
    },
    PeerRemovedSubjects {
        username: String,
        subjects: SubjectSet,
    },
    HelpRequested(HelpRequest),
    /// The link dropped without the engine asking for it. Sent once per
    /// link, after which every call fails with `NotConnected`.
    LinkLost,
}

impl PushEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::PeerAddedSubjects { .. } => "peer_added_subjects",
            Self::PeerRemovedSubjects { .. } => "peer_removed_subjects",
            Self::HelpRequested(_) => "help_requested",
            Self::LinkLost => "link_lost",
        }
    }
}

/// Request/response channel to the directory broker.
///
/// Every method fails with [`TransportError::NotConnected`] while the link
/// is down. Other errors are broker-specific and surfaced unchanged.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the link. Safe to call again after a failure.
    async fn connect(&self) -> Result<(), TransportError>;

    async fn login(&self) -> Result<LoginToken, TransportError>;

    async fn get_subject_list(&self) -> Result<SubjectSet, TransportError>;

    async fn get_cascader_list(&self) -> Result<Vec<CascaderRecord>, TransportError>;

    async fn add_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError>;

    async fn remove_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError>;

    async fn start_cascading(&self) -> Result<(), TransportError>;

    async fn stop_cascading(&self) -> Result<(), TransportError>;

    /// Tears down the link. Called once when the session engine stops.
    async fn close(&self) {}
}
