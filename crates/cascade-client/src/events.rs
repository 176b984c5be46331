//! Change notifications for external consumers (typically a UI).
//!
//! The session engine publishes a [`SessionEvent`] on the [`EventBus`]
//! after every directory mutation, own-subject change, help request and
//! connection state transition. Subscribers receive events in the order they
//! were generated; a subscriber that falls more than [`EVENT_BUFFER`] events
//! behind sees `RecvError::Lagged` and should re-read the current directory
//! snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use cascade_core::{PeerRegistry, SubjectSet};

use crate::session::ConnectionState;
use crate::transport::HelpRequest;

/// Broadcast buffer size.
pub const EVENT_BUFFER: usize = 256;

/// Events published by the session engine.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The peer directory changed; carries the new immutable snapshot.
    DirectoryChanged { directory: Arc<PeerRegistry> },

    /// The local user's desired subject set changed.
    OwnSubjectsChanged { subjects: SubjectSet },

    /// Another user asked for help.
    HelpRequested {
        request: HelpRequest,
        received_at: DateTime<Utc>,
    },

    /// The broker connection moved to a new state.
    ConnectionChanged { state: ConnectionState },
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event, returning how many subscribers received it.
    ///
    /// Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUFFER)
    }
}
