//! Session synchronization engine.
//!
//! Uses the actor pattern: a single task owns the session state and the
//! peer directory, handles are cheap to clone, and every mutation is
//! announced on the [`EventBus`](crate::events::EventBus).

mod actor;
mod commands;
mod handle;
mod reconnect;
mod state;

pub use actor::{ActorParts, SessionActor};
pub use commands::{Reply, SessionCommand, SessionSnapshot};
pub use handle::SessionHandle;
pub use state::{ConnectionState, SessionState};

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use cascade_core::{LabResolver, PeerRegistry};

use crate::config::SessionConfig;
use crate::events::{EventBus, EVENT_BUFFER};
use crate::transport::{PushEvent, Transport};

/// Capacity of the session command channel.
pub const COMMAND_BUFFER: usize = 100;

/// Suggested capacity for a transport's push channel.
pub const PUSH_BUFFER: usize = 256;

/// Spawns the session actor and returns a handle to it.
///
/// The session starts `Disconnected`. Call [`SessionHandle::connect`] and
/// [`SessionHandle::login`], or [`SessionHandle::reconnect`] to let the
/// background loop do both.
///
/// Dropping every handle or cancelling `cancel_token` stops the actor.
pub fn spawn_session(
    transport: Arc<dyn Transport>,
    pushes: mpsc::Receiver<PushEvent>,
    resolver: Arc<dyn LabResolver>,
    config: SessionConfig,
    cancel_token: CancellationToken,
) -> SessionHandle {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let directory = PeerRegistry::new(config.local_username.clone(), resolver);
    let (directory_tx, directory_rx) = watch::channel(Arc::new(directory.clone()));
    let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
    let events = EventBus::new(EVENT_BUFFER);

    let parts = ActorParts {
        receiver,
        pushes,
        commands: sender.downgrade(),
        transport,
        directory_tx,
        connection_tx,
        events: events.clone(),
        cancel_token: cancel_token.clone(),
    };
    let actor = SessionActor::new(parts, config, directory);
    tokio::spawn(actor.run());

    SessionHandle::new(sender, directory_rx, connection_rx, events, cancel_token)
}
