//! Session actor - owns the session state and the peer directory.
//!
//! The SessionActor is the single writer of both. It processes user
//! commands, reconnect attempts and broker push events one at a time, so a
//! push handler can never interleave with a login bootstrap. Pushes that
//! arrive while a broker call is in flight are drained into a queue and
//! applied, in order, once the command finishes.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Response send failures are ignored (the caller dropped its receiver)
//! - Event publish failures are ignored (nobody is listening)

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cascade_core::{CascaderRecord, PeerRegistry, SubjectSet};

use super::commands::{SessionCommand, SessionSnapshot};
use super::reconnect::spawn_reconnect_loop;
use super::state::{ConnectionState, SessionState};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult, TransportError};
use crate::events::{EventBus, SessionEvent};
use crate::transport::{PushEvent, Transport};

// ============================================================================
// Session Actor
// ============================================================================

/// The session actor.
///
/// # Ownership
///
/// - `state`: desired/acknowledged subjects, cascading flag, connection
/// - `directory`: the peer registry, replaced copy-on-write on every
///   mutation and published through `directory_tx`
///
/// Readers never touch the actor's copy: they hold `Arc` snapshots that are
/// immutable once published.
pub struct SessionActor {
    /// User and reconnect commands
    receiver: mpsc::Receiver<SessionCommand>,

    /// Broker notifications
    pushes: mpsc::Receiver<PushEvent>,
    pushes_open: bool,

    /// Pushes received during the current command
    deferred: VecDeque<PushEvent>,

    /// Handed to the reconnect loop; weak so the actor does not keep its
    /// own command channel open.
    commands: mpsc::WeakSender<SessionCommand>,

    transport: Arc<dyn Transport>,
    config: SessionConfig,
    state: SessionState,
    directory: Arc<PeerRegistry>,
    directory_tx: watch::Sender<Arc<PeerRegistry>>,
    connection_tx: watch::Sender<ConnectionState>,
    events: EventBus,
    cancel_token: CancellationToken,

    /// True while a reconnect loop is running
    reconnecting: bool,
}

/// Channels and collaborators the actor is built from.
pub struct ActorParts {
    pub receiver: mpsc::Receiver<SessionCommand>,
    pub pushes: mpsc::Receiver<PushEvent>,
    pub commands: mpsc::WeakSender<SessionCommand>,
    pub transport: Arc<dyn Transport>,
    pub directory_tx: watch::Sender<Arc<PeerRegistry>>,
    pub connection_tx: watch::Sender<ConnectionState>,
    pub events: EventBus,
    pub cancel_token: CancellationToken,
}

impl SessionActor {
    /// Creates a new session actor around an empty directory.
    pub fn new(parts: ActorParts, config: SessionConfig, directory: PeerRegistry) -> Self {
        let directory = Arc::new(directory);
        parts.directory_tx.send_replace(Arc::clone(&directory));

        Self {
            receiver: parts.receiver,
            pushes: parts.pushes,
            pushes_open: true,
            deferred: VecDeque::new(),
            commands: parts.commands,
            transport: parts.transport,
            config,
            state: SessionState::default(),
            directory,
            directory_tx: parts.directory_tx,
            connection_tx: parts.connection_tx,
            events: parts.events,
            cancel_token: parts.cancel_token,
            reconnecting: false,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes messages until every handle is dropped or the cancellation
    /// token fires, then closes the transport.
    pub async fn run(mut self) {
        info!(username = %self.config.local_username, "Session actor starting");

        loop {
            // Pushes already queued are applied before the next command
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    debug!("Session actor cancelled");
                    break;
                }
                push = self.pushes.recv(), if self.pushes_open => match push {
                    Some(push) => self.handle_push(push),
                    None => {
                        debug!("Push channel closed");
                        self.pushes_open = false;
                    }
                },
                command = self.receiver.recv() => match command {
                    Some(command) => {
                        self.handle_command(command).await;
                        self.apply_deferred();
                    }
                    None => {
                        debug!("All session handles dropped");
                        break;
                    }
                },
            }
        }

        self.transport.close().await;
        info!(
            peers = self.directory.len(),
            "Session actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { respond_to } => {
                let result = self.connect().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Login { respond_to } => {
                let result = self.login().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Reconnect { respond_to } => {
                let result = self.reconnect_attempt().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::ScheduleReconnect => {
                if self.state.connection != ConnectionState::LoggedIn {
                    self.schedule_reconnect();
                }
            }
            SessionCommand::StartCascading { respond_to } => {
                let result = self.start_cascading().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::StopCascading { respond_to } => {
                let result = self.stop_cascading().await;
                let _ = respond_to.send(result);
            }
            SessionCommand::AddSubjects {
                subjects,
                force,
                respond_to,
            } => {
                let result = self.add_subjects(subjects, force).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::RemoveSubjects {
                subjects,
                respond_to,
            } => {
                let result = self.remove_subjects(subjects).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::GetSnapshot { respond_to } => {
                let _ = respond_to.send(SessionSnapshot::from(&self.state));
            }
        }
    }

    // ========================================================================
    // Connection Lifecycle
    // ========================================================================

    /// Brings the link up. Already-connected sessions succeed immediately.
    async fn connect(&mut self) -> SessionResult<()> {
        if self.state.connection.is_connected() {
            return Ok(());
        }

        self.set_connection(ConnectionState::Connecting);
        match self.transport.connect().await {
            Ok(()) => {
                self.set_connection(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                debug!(error = %e, "Connect attempt failed");
                self.set_connection(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    /// Logs in, adopts the broker's view, then restores local intent.
    ///
    /// Order: cascader list, subject list, `LoggedIn`, restore. The restore
    /// step reads `desired_subjects` after the subject list replaced it.
    async fn login(&mut self) -> SessionResult<()> {
        if self.state.connection != ConnectionState::Connected {
            return Err(SessionError::InvalidState {
                operation: "login",
                required: ConnectionState::Connected,
                actual: self.state.connection,
            });
        }

        let transport = Arc::clone(&self.transport);

        let token = self.guarded("login", transport.login()).await?;
        debug!(token_len = token.as_str().len(), "Login accepted");

        let cascaders = self
            .guarded("get_cascader_list", transport.get_cascader_list())
            .await?;
        self.adopt_cascaders(cascaders);

        let subjects = self
            .guarded("get_subject_list", transport.get_subject_list())
            .await?;
        debug!(subjects = subjects.len(), "Adopting subject list from broker");
        self.state.desired_subjects = subjects;
        self.publish_own_subjects();

        self.set_connection(ConnectionState::LoggedIn);
        info!(
            peers = self.directory.len(),
            subjects = self.state.desired_subjects.len(),
            "Logged in to broker"
        );

        self.restore().await
    }

    /// Re-establishes cascading and resends every desired subject.
    ///
    /// A fresh broker session has no memory of earlier announcements.
    async fn restore(&mut self) -> SessionResult<()> {
        debug!(cascading = self.state.cascading, "Restoring session settings");
        self.state.acknowledged_subjects.clear();

        if self.state.cascading {
            self.start_cascading().await?;
        }

        let desired = self.state.desired_subjects.clone();
        self.add_subjects(desired, true).await
    }

    /// One connect-then-login attempt on behalf of the reconnect loop.
    async fn reconnect_attempt(&mut self) -> SessionResult<()> {
        if self.state.connection == ConnectionState::LoggedIn {
            self.reconnecting = false;
            return Ok(());
        }

        let result = match self.connect().await {
            Ok(()) => self.login().await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                info!("Reconnected to broker");
                self.reconnecting = false;
            }
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "Reconnect attempt failed");
            }
            Err(e) => {
                warn!(error = %e, "Reconnect stopped by non-connectivity error");
                self.reconnecting = false;
            }
        }

        result
    }

    /// Single guard for every connection-dependent call.
    ///
    /// A connectivity failure drops the session to `Disconnected`, schedules
    /// the reconnect loop and is returned to the caller as `NotConnected`.
    /// Other errors pass through unchanged.
    ///
    /// The push channel keeps being drained while `call` is pending, so a
    /// transport blocked on a full push channel can still deliver the
    /// response.
    async fn guarded<T, F>(&mut self, operation: &'static str, call: F) -> SessionResult<T>
    where
        F: Future<Output = Result<T, TransportError>>,
    {
        tokio::pin!(call);

        let outcome = loop {
            tokio::select! {
                biased;
                result = &mut call => break result,
                push = self.pushes.recv(), if self.pushes_open => match push {
                    Some(push) => self.deferred.push_back(push),
                    None => self.pushes_open = false,
                },
            }
        };
        while let Ok(push) = self.pushes.try_recv() {
            self.deferred.push_back(push);
        }

        match outcome {
            Ok(value) => Ok(value),
            Err(e) if e.is_connectivity() => {
                self.connection_lost(operation, &e);
                Err(SessionError::NotConnected)
            }
            Err(e) => {
                warn!(operation, error = %e, "Broker call failed");
                Err(SessionError::Transport(e))
            }
        }
    }

    fn connection_lost(&mut self, operation: &'static str, error: &TransportError) {
        warn!(operation, error = %error, "Lost connection to broker");
        self.drop_to_disconnected();
    }

    fn drop_to_disconnected(&mut self) {
        self.state.acknowledged_subjects.clear();
        self.set_connection(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnecting {
            debug!("Reconnect loop already running");
            return;
        }
        if self.cancel_token.is_cancelled() {
            return;
        }

        info!(
            interval_secs = self.config.retry_interval.as_secs_f64(),
            "Scheduling reconnect"
        );
        self.reconnecting = true;
        spawn_reconnect_loop(
            self.commands.clone(),
            self.config.retry_interval,
            self.cancel_token.clone(),
        );
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.state.connection == state {
            return;
        }
        debug!(from = %self.state.connection, to = %state, "Connection state changed");
        self.state.connection = state;
        self.connection_tx.send_replace(state);
        self.events.publish(SessionEvent::ConnectionChanged { state });
    }

    // ========================================================================
    // User Intents
    // ========================================================================

    /// Intents need an accepted login. `Disconnected` is let through: the
    /// intent is recorded and the call fails with `NotConnected`, which keeps
    /// the reconnect loop going.
    fn require_session(&self, operation: &'static str) -> SessionResult<()> {
        match self.state.connection {
            ConnectionState::LoggedIn | ConnectionState::Disconnected => Ok(()),
            actual => Err(SessionError::InvalidState {
                operation,
                required: ConnectionState::LoggedIn,
                actual,
            }),
        }
    }

    /// Records the intent to cascade, then tells the broker.
    ///
    /// Legacy mode clears the flag instead, as historical clients did.
    async fn start_cascading(&mut self) -> SessionResult<()> {
        self.require_session("start_cascading")?;
        self.state.cascading = !self.config.subject_algebra.is_legacy();
        let transport = Arc::clone(&self.transport);
        self.guarded("start_cascading", transport.start_cascading())
            .await?;
        info!("Cascading started");
        Ok(())
    }

    async fn stop_cascading(&mut self) -> SessionResult<()> {
        self.require_session("stop_cascading")?;
        self.state.cascading = false;
        let transport = Arc::clone(&self.transport);
        self.guarded("stop_cascading", transport.stop_cascading())
            .await?;
        info!("Cascading stopped");
        Ok(())
    }

    /// Announces subjects.
    ///
    /// Without `force` only subjects not already desired are sent. The
    /// desired set is updated before the call so the intent survives a
    /// disconnect.
    async fn add_subjects(&mut self, subjects: SubjectSet, force: bool) -> SessionResult<()> {
        self.require_session("add_subjects")?;
        let to_send: SubjectSet = if force {
            subjects
        } else {
            subjects
                .difference(&self.state.desired_subjects)
                .cloned()
                .collect()
        };

        let merged = self
            .config
            .subject_algebra
            .merge(&self.state.desired_subjects, &to_send);
        if merged != self.state.desired_subjects {
            self.state.desired_subjects = merged;
            self.publish_own_subjects();
        }

        if to_send.is_empty() {
            debug!(force, "No subjects to send");
            return Ok(());
        }

        debug!(subjects = ?to_send, force, "Adding subjects");
        let transport = Arc::clone(&self.transport);
        self.guarded("add_subjects", transport.add_subjects(&to_send))
            .await?;
        self.state.acknowledged_subjects.extend(to_send);
        Ok(())
    }

    /// Withdraws subjects from the desired set and from the broker.
    async fn remove_subjects(&mut self, subjects: SubjectSet) -> SessionResult<()> {
        self.require_session("remove_subjects")?;
        if subjects.is_empty() {
            return Ok(());
        }

        let before = self.state.desired_subjects.len();
        self.state
            .desired_subjects
            .retain(|s| !subjects.contains(s));
        if self.state.desired_subjects.len() != before {
            self.publish_own_subjects();
        }

        debug!(subjects = ?subjects, "Removing subjects");
        let transport = Arc::clone(&self.transport);
        self.guarded("remove_subjects", transport.remove_subjects(&subjects))
            .await?;
        self.state
            .acknowledged_subjects
            .retain(|s| !subjects.contains(s));
        Ok(())
    }

    fn publish_own_subjects(&self) {
        self.events.publish(SessionEvent::OwnSubjectsChanged {
            subjects: self.state.desired_subjects.clone(),
        });
    }

    // ========================================================================
    // Directory
    // ========================================================================

    /// Replaces the directory with the broker's full cascader list.
    fn adopt_cascaders(&mut self, cascaders: Vec<CascaderRecord>) {
        debug!(count = cascaders.len(), "Adopting cascader list from broker");
        self.update_directory(|directory| {
            directory.clear();
            for record in cascaders {
                directory.upsert_peer(&record.username, &record.host, record.subjects);
            }
        });
    }

    /// Applies `mutate` to a private copy of the directory, then publishes it.
    fn update_directory<F, R>(&mut self, mutate: F) -> R
    where
        F: FnOnce(&mut PeerRegistry) -> R,
    {
        let result = mutate(Arc::make_mut(&mut self.directory));
        self.directory_tx.send_replace(Arc::clone(&self.directory));
        self.events.publish(SessionEvent::DirectoryChanged {
            directory: Arc::clone(&self.directory),
        });
        result
    }

    fn apply_deferred(&mut self) {
        while let Some(push) = self.deferred.pop_front() {
            self.handle_push(push);
        }
    }

    /// Handles one broker notification.
    fn handle_push(&mut self, push: PushEvent) {
        debug!(kind = push.kind(), "Push received");
        let algebra = self.config.subject_algebra;

        let result = match push {
            PushEvent::PeerJoined {
                username,
                host,
                subjects,
            } => {
                info!(username = %username, host = %host, "Cascader joined");
                self.update_directory(|d| {
                    d.upsert_peer(&username, &host, subjects);
                    Ok(())
                })
            }
            PushEvent::PeerLeft { username } => {
                info!(username = %username, "Cascader left");
                self.update_directory(|d| d.remove_peer(&username).map(|_| ()))
            }
            PushEvent::PeerAddedSubjects { username, subjects } => {
                self.update_directory(|d| {
                    if algebra.is_legacy() {
                        d.narrow_subjects(&username, &subjects)
                    } else {
                        d.add_subjects(&username, &subjects)
                    }
                })
            }
            PushEvent::PeerRemovedSubjects { username, subjects } => {
                self.update_directory(|d| d.remove_subjects(&username, &subjects))
            }
            PushEvent::LinkLost => {
                if self.state.connection != ConnectionState::Disconnected {
                    warn!("Broker dropped the link");
                    self.drop_to_disconnected();
                }
                return;
            }
            PushEvent::HelpRequested(request) => {
                info!(
                    help_id = %request.id,
                    username = %request.username,
                    subject = %request.subject,
                    "User asking for help"
                );
                self.events.publish(SessionEvent::HelpRequested {
                    request,
                    received_at: Utc::now(),
                });
                Ok(())
            }
        };

        if let Err(e) = result {
            // Expected for the local user, who is never in the directory
            warn!(error = %e, "Directory update for unknown cascader");
        }
    }
}
