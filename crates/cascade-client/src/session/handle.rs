//! Client interface for interacting with the SessionActor.
//!
//! The `SessionHandle` is cheap to clone and can be shared across tasks.
//! Intents go to the actor over a channel; reads of the peer directory and
//! connection state come straight from `watch` channels and never wait on
//! the actor.
//!
//! # Panic-Free Guarantees
//!
//! Channel errors are mapped to `SessionError::ChannelClosed`.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use cascade_core::{PeerRegistry, Subject, SubjectSet};

use super::commands::{Reply, SessionCommand, SessionSnapshot};
use super::state::ConnectionState;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventBus, SessionEvent};

/// Handle for interacting with the session actor.
///
/// ```ignore
/// let session = spawn_session(transport, pushes, resolver, config, cancel);
/// let mut events = session.subscribe();
///
/// session.reconnect().await;
/// session.wait_for_state(ConnectionState::LoggedIn).await?;
/// session.add_subjects(["maths"]).await?;
///
/// let directory = session.directory();
/// for peer in directory.query(&PeerQuery::new().subjects(["maths"])) {
///     println!("{} on {}", peer.username, peer.host);
/// }
/// ```
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    directory: watch::Receiver<Arc<PeerRegistry>>,
    connection: watch::Receiver<ConnectionState>,
    events: EventBus,
    cancel_token: CancellationToken,
}

impl SessionHandle {
    pub fn new(
        sender: mpsc::Sender<SessionCommand>,
        directory: watch::Receiver<Arc<PeerRegistry>>,
        connection: watch::Receiver<ConnectionState>,
        events: EventBus,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            sender,
            directory,
            connection,
            events,
            cancel_token,
        }
    }

    async fn request<F>(&self, build: F) -> SessionResult<()>
    where
        F: FnOnce(Reply<()>) -> SessionCommand,
    {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| SessionError::ChannelClosed)?;

        rx.await.map_err(|_| SessionError::ChannelClosed)?
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Brings the broker link up.
    ///
    /// # Errors
    ///
    /// The transport's connect error; the session stays `Disconnected` and
    /// this may be called again.
    pub async fn connect(&self) -> SessionResult<()> {
        self.request(|respond_to| SessionCommand::Connect { respond_to })
            .await
    }

    /// Logs in and runs the bootstrap sequence.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` unless the session is `Connected`
    /// - `SessionError::NotConnected` if the link dropped (reconnect scheduled)
    /// - `SessionError::Transport` for broker-side failures
    pub async fn login(&self) -> SessionResult<()> {
        self.request(|respond_to| SessionCommand::Login { respond_to })
            .await
    }

    /// Starts the background reconnect loop unless already logged in.
    ///
    /// Fire-and-forget: returns as soon as the actor has the request.
    pub async fn reconnect(&self) {
        let _ = self.sender.send(SessionCommand::ScheduleReconnect).await;
    }

    /// Resolves once the session reaches `state`.
    ///
    /// # Errors
    ///
    /// `SessionError::ChannelClosed` if the actor stops first.
    pub async fn wait_for_state(&self, state: ConnectionState) -> SessionResult<()> {
        let mut connection = self.connection.clone();
        connection
            .wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::ChannelClosed)
    }

    /// Stops the actor and any reconnect loop.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Offers help. The intent is remembered and restored after a relogin.
    pub async fn start_cascading(&self) -> SessionResult<()> {
        self.request(|respond_to| SessionCommand::StartCascading { respond_to })
            .await
    }

    pub async fn stop_cascading(&self) -> SessionResult<()> {
        self.request(|respond_to| SessionCommand::StopCascading { respond_to })
            .await
    }

    /// Announces subjects not already desired.
    pub async fn add_subjects<I, S>(&self, subjects: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Subject>,
    {
        self.add_subjects_with(collect(subjects), false).await
    }

    /// Announces subjects; with `force` all of them are resent.
    pub async fn add_subjects_with(&self, subjects: SubjectSet, force: bool) -> SessionResult<()> {
        self.request(|respond_to| SessionCommand::AddSubjects {
            subjects,
            force,
            respond_to,
        })
        .await
    }

    /// Withdraws subjects.
    pub async fn remove_subjects<I, S>(&self, subjects: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<Subject>,
    {
        let subjects = collect(subjects);
        self.request(|respond_to| SessionCommand::RemoveSubjects {
            subjects,
            respond_to,
        })
        .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current session state.
    ///
    /// # Errors
    ///
    /// `SessionError::ChannelClosed` if the actor has shut down.
    pub async fn snapshot(&self) -> SessionResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SessionCommand::GetSnapshot { respond_to: tx })
            .await
            .map_err(|_| SessionError::ChannelClosed)?;

        rx.await.map_err(|_| SessionError::ChannelClosed)
    }

    /// Latest published directory snapshot.
    pub fn directory(&self) -> Arc<PeerRegistry> {
        Arc::clone(&self.directory.borrow())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Subscribes to session events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Returns `true` while the actor's command channel is open.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

fn collect<I, S>(subjects: I) -> SubjectSet
where
    I: IntoIterator<Item = S>,
    S: Into<Subject>,
{
    subjects.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::subject_set;

    fn create_test_handle() -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (_directory_tx, directory_rx) =
            watch::channel(Arc::new(PeerRegistry::without_labs("me")));
        let (_connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = SessionHandle::new(
            cmd_tx,
            directory_rx,
            connection_rx,
            EventBus::default(),
            CancellationToken::new(),
        );
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_add_subjects_sends_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(SessionCommand::AddSubjects {
                subjects,
                force,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(subjects, subject_set(["maths", "java"]));
                assert!(!force);
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle.add_subjects(["maths", "java", "maths"]).await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_error_from_actor_is_returned() {
        let (handle, mut rx) = create_test_handle();

        tokio::spawn(async move {
            if let Some(SessionCommand::StartCascading { respond_to }) = rx.recv().await {
                let _ = respond_to.send(Err(SessionError::NotConnected));
            }
        });

        assert_eq!(
            handle.start_cascading().await,
            Err(SessionError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert_eq!(handle.login().await, Err(SessionError::ChannelClosed));
        assert_eq!(handle.snapshot().await, Err(SessionError::ChannelClosed));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_reconnect_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        // Should not panic or error
        handle.reconnect().await;
    }

    #[tokio::test]
    async fn test_reads_do_not_touch_actor() {
        let (handle, _rx) = create_test_handle();

        assert!(handle.directory().is_empty());
        assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let (handle, _rx) = create_test_handle();
        let token = handle.cancel_token.clone();

        handle.shutdown();
        assert!(token.is_cancelled());
    }
}
