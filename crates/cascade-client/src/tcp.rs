//! Newline-delimited JSON transport over TCP.
//!
//! One connection carries both request/response traffic and push
//! notifications. A reader task routes responses to the waiting caller by
//! request id and forwards pushes to the session engine; a writer task
//! serializes outbound lines. Either task closing the link fails every
//! in-flight call with `NotConnected`. When the broker side drops the link,
//! the reader also pushes [`PushEvent::LinkLost`] so an idle engine notices.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`. Poisoned locks are recovered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cascade_core::{CascaderRecord, SubjectSet};
use cascade_protocol::{
    decode_result, CascaderList, ClientMessage, LoginResult, ProtocolVersion, Request, RequestId,
    ServerMessage, SubjectList,
};

use crate::error::TransportError;
use crate::session::PUSH_BUFFER;
use crate::transport::{HelpRequest, LoginToken, PushEvent, Transport};

type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Result<Value, TransportError>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where to connect and who to log in as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// `host:port`
    pub addr: String,
    pub username: String,
    pub hostname: String,
}

/// A live connection. Replaced wholesale on reconnect.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    closed: CancellationToken,
}

impl Link {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

/// [`Transport`] speaking the cascade wire protocol over TCP.
pub struct TcpTransport {
    config: TcpConfig,
    pushes: mpsc::Sender<PushEvent>,
    link: Mutex<Option<Link>>,
    next_id: AtomicU64,
}

impl TcpTransport {
    /// Creates a disconnected transport and the push stream it feeds.
    pub fn new(config: TcpConfig) -> (Self, mpsc::Receiver<PushEvent>) {
        let (pushes, rx) = mpsc::channel(PUSH_BUFFER);
        let transport = Self {
            config,
            pushes,
            link: Mutex::new(None),
            next_id: AtomicU64::new(1),
        };
        (transport, rx)
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Sends one request and waits for its response.
    async fn call(&self, request: Request) -> Result<Value, TransportError> {
        let (outbound, pending, closed) = {
            let guard = lock(&self.link);
            match guard.as_ref() {
                Some(link) if link.is_open() => (
                    link.outbound.clone(),
                    Arc::clone(&link.pending),
                    link.closed.clone(),
                ),
                _ => return Err(TransportError::NotConnected),
            }
        };

        let method = request.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = ClientMessage::new(id, request)
            .to_line()
            .map_err(TransportError::protocol)?;

        let (tx, rx) = oneshot::channel();
        lock(&pending).insert(id, tx);

        if outbound.send(line).is_err() {
            lock(&pending).remove(&id);
            return Err(TransportError::NotConnected);
        }
        debug!(id, method, "Sent request");

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(TransportError::NotConnected)),
            _ = closed.cancelled() => {
                lock(&pending).remove(&id);
                Err(TransportError::NotConnected)
            }
        }
    }

    fn decode<T>(method: &str, value: Value) -> Result<T, TransportError>
    where
        T: serde::de::DeserializeOwned,
    {
        decode_result(method, value).map_err(TransportError::protocol)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = lock(&self.link).take() {
            link.closed.cancel();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if lock(&self.link).as_ref().is_some_and(Link::is_open) {
            return Ok(());
        }

        let stream = TcpStream::connect(&self.config.addr)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{}: {e}", self.config.addr)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        let (reader, writer) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(writer, outbound_rx, closed.clone()));
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            self.pushes.clone(),
            closed.clone(),
        ));

        let previous = lock(&self.link).replace(Link {
            outbound,
            pending,
            closed,
        });
        if let Some(previous) = previous {
            previous.closed.cancel();
        }

        info!(addr = %self.config.addr, "Connected to broker");
        Ok(())
    }

    async fn login(&self) -> Result<LoginToken, TransportError> {
        let value = self
            .call(Request::Login {
                username: self.config.username.clone(),
                hostname: self.config.hostname.clone(),
            })
            .await?;
        let result: LoginResult = Self::decode("login", value)?;
        if let Some(version) = result.protocol_version {
            ProtocolVersion::CURRENT
                .check(&version)
                .map_err(TransportError::protocol)?;
        }
        Ok(LoginToken::new(result.token))
    }

    async fn get_subject_list(&self) -> Result<SubjectSet, TransportError> {
        let value = self.call(Request::GetSubjectList).await?;
        let subjects: SubjectList = Self::decode("get_subject_list", value)?;
        Ok(subjects.into_iter().collect())
    }

    async fn get_cascader_list(&self) -> Result<Vec<CascaderRecord>, TransportError> {
        let value = self.call(Request::GetCascaderList).await?;
        let cascaders: CascaderList = Self::decode("get_cascader_list", value)?;
        Ok(cascaders)
    }

    async fn add_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError> {
        self.call(Request::AddSubjects {
            subjects: subjects.iter().cloned().collect(),
        })
        .await
        .map(|_| ())
    }

    async fn remove_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError> {
        self.call(Request::RemoveSubjects {
            subjects: subjects.iter().cloned().collect(),
        })
        .await
        .map(|_| ())
    }

    async fn start_cascading(&self) -> Result<(), TransportError> {
        self.call(Request::StartCascading).await.map(|_| ())
    }

    async fn stop_cascading(&self) -> Result<(), TransportError> {
        self.call(Request::StopCascading).await.map(|_| ())
    }

    async fn close(&self) {
        if let Some(link) = lock(&self.link).take() {
            link.closed.cancel();
            debug!(addr = %self.config.addr, "Closed broker link");
        }
    }
}

// ============================================================================
// Connection Tasks
// ============================================================================

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            line = outbound.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = closed.cancelled() => break,
        };

        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = written.await {
            warn!(error = %e, "Write to broker failed");
            break;
        }
    }

    closed.cancel();
    let _ = writer.shutdown().await;
}

async fn read_loop(
    reader: OwnedReadHalf,
    pending: Pending,
    pushes: mpsc::Sender<PushEvent>,
    closed: CancellationToken,
) {
    let mut lines = BufReader::new(reader).lines();

    // False when the link was closed from our side
    let lost = loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = closed.cancelled() => break false,
        };

        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match ServerMessage::parse_line(&line) {
                    Ok(message) => route(message, &pending, &pushes).await,
                    // Continue reading - a single bad line does not drop the link
                    Err(e) => warn!(error = %e, "Ignoring malformed broker message"),
                }
            }
            Ok(None) => {
                info!("Broker closed connection");
                break true;
            }
            Err(e) => {
                warn!(error = %e, "Read from broker failed");
                break true;
            }
        }
    };

    closed.cancel();

    // Queued ahead of the failed waiters so the engine sees it before any
    // caller can act on `NotConnected`
    if lost && pushes.send(PushEvent::LinkLost).await.is_err() {
        debug!("Push receiver dropped");
    }

    let waiters: Vec<_> = lock(&pending).drain().collect();
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(TransportError::NotConnected));
    }
}

async fn route(message: ServerMessage, pending: &Pending, pushes: &mpsc::Sender<PushEvent>) {
    let Some(id) = message.request_id() else {
        if let Some(event) = push_event(message) {
            if pushes.send(event).await.is_err() {
                debug!("Push receiver dropped");
            }
        }
        return;
    };

    let Some(waiter) = lock(pending).remove(&id) else {
        warn!(id, "Response for unknown request");
        return;
    };

    let outcome = match message {
        ServerMessage::Response { result, .. } => Ok(result),
        ServerMessage::Error { message, code, .. } => Err(TransportError::Remote { message, code }),
        _ => return,
    };
    let _ = waiter.send(outcome);
}

/// Converts a broker notification into a [`PushEvent`].
fn push_event(message: ServerMessage) -> Option<PushEvent> {
    let event = match message {
        ServerMessage::CascaderJoined {
            username,
            host,
            subjects,
        } => PushEvent::PeerJoined {
            username,
            host,
            subjects: subjects.into_iter().collect(),
        },
        ServerMessage::CascaderLeft { username } => PushEvent::PeerLeft { username },
        ServerMessage::CascaderAddedSubjects { username, subjects } => {
            PushEvent::PeerAddedSubjects {
                username,
                subjects: subjects.into_iter().collect(),
            }
        }
        ServerMessage::CascaderRemovedSubjects { username, subjects } => {
            PushEvent::PeerRemovedSubjects {
                username,
                subjects: subjects.into_iter().collect(),
            }
        }
        ServerMessage::UserAskingForHelp {
            help_id,
            username,
            host,
            subject,
            description,
        } => PushEvent::HelpRequested(HelpRequest {
            id: help_id,
            username,
            host,
            subject,
            description,
        }),
        ServerMessage::Response { .. } | ServerMessage::Error { .. } => return None,
    };
    Some(event)
}
