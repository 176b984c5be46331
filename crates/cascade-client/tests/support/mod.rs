//! Shared helpers for the session integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use cascade_client::{
    spawn_session, LoginToken, PushEvent, SessionConfig, SessionEvent, SessionHandle, Transport,
    TransportError,
};
use cascade_core::{
    CascaderRecord, LabResolver, NoLabs, PeerRegistry, SubjectAlgebra, SubjectSet,
};

pub const LOCAL_USER: &str = "me";

// ============================================================================
// Scripted Transport
// ============================================================================

/// What the fake broker knows and what it has been asked.
#[derive(Debug, Default)]
pub struct Script {
    pub connected: bool,

    /// Remaining connect attempts that fail with `ConnectFailed`
    pub connect_failures: usize,

    /// Time of every connect attempt, successful or not
    pub connect_attempts: Vec<Instant>,

    /// Method names in call order
    pub calls: Vec<&'static str>,

    pub cascaders: Vec<CascaderRecord>,

    /// The broker's subject list for the local user
    pub subjects: SubjectSet,

    pub added: Vec<SubjectSet>,
    pub removed: Vec<SubjectSet>,
    pub cascading: bool,

    /// Returned by every login while set
    pub login_error: Option<TransportError>,
}

/// In-memory broker stand-in. Calls fail with `NotConnected` while the
/// link is down.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(setup: impl FnOnce(&mut Script)) -> Arc<Self> {
        let transport = Self::default();
        setup(&mut transport.script());
        Arc::new(transport)
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Simulates the broker dropping the link. Connects keep failing until
    /// [`heal`](Self::heal).
    pub fn drop_link(&self) {
        let mut script = self.script();
        script.connected = false;
        script.connect_failures = usize::MAX;
    }

    pub fn heal(&self) {
        self.script().connect_failures = 0;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.script().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.script().calls.clear();
    }

    fn begin(&self, method: &'static str) -> Result<MutexGuard<'_, Script>, TransportError> {
        let mut script = self.script();
        script.calls.push(method);
        if script.connected {
            Ok(script)
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut script = self.script();
        script.calls.push("connect");
        script.connect_attempts.push(Instant::now());
        if script.connect_failures > 0 {
            script.connect_failures -= 1;
            return Err(TransportError::ConnectFailed("connection refused".to_string()));
        }
        script.connected = true;
        Ok(())
    }

    async fn login(&self) -> Result<LoginToken, TransportError> {
        let script = self.begin("login")?;
        match &script.login_error {
            Some(e) => Err(e.clone()),
            None => Ok(LoginToken::new("token-1")),
        }
    }

    async fn get_subject_list(&self) -> Result<SubjectSet, TransportError> {
        let script = self.begin("get_subject_list")?;
        Ok(script.subjects.clone())
    }

    async fn get_cascader_list(&self) -> Result<Vec<CascaderRecord>, TransportError> {
        let script = self.begin("get_cascader_list")?;
        Ok(script.cascaders.clone())
    }

    async fn add_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError> {
        let mut script = self.begin("add_subjects")?;
        script.subjects.extend(subjects.iter().cloned());
        script.added.push(subjects.clone());
        Ok(())
    }

    async fn remove_subjects(&self, subjects: &SubjectSet) -> Result<(), TransportError> {
        let mut script = self.begin("remove_subjects")?;
        script.subjects.retain(|s| !subjects.contains(s));
        script.removed.push(subjects.clone());
        Ok(())
    }

    async fn start_cascading(&self) -> Result<(), TransportError> {
        let mut script = self.begin("start_cascading")?;
        script.cascading = true;
        Ok(())
    }

    async fn stop_cascading(&self) -> Result<(), TransportError> {
        let mut script = self.begin("stop_cascading")?;
        script.cascading = false;
        Ok(())
    }
}

// ============================================================================
// Session Helpers
// ============================================================================

pub struct TestSession {
    pub handle: SessionHandle,
    pub pushes: mpsc::Sender<PushEvent>,
    pub transport: Arc<ScriptedTransport>,
}

pub fn start_session(transport: Arc<ScriptedTransport>, algebra: SubjectAlgebra) -> TestSession {
    start_session_with(transport, algebra, Arc::new(NoLabs))
}

pub fn start_session_with(
    transport: Arc<ScriptedTransport>,
    algebra: SubjectAlgebra,
    resolver: Arc<dyn LabResolver>,
) -> TestSession {
    let (pushes, push_rx) = mpsc::channel(16);
    let config = SessionConfig::new(LOCAL_USER).with_subject_algebra(algebra);
    let handle = spawn_session(
        Arc::clone(&transport) as Arc<dyn Transport>,
        push_rx,
        resolver,
        config,
        CancellationToken::new(),
    );
    TestSession {
        handle,
        pushes,
        transport,
    }
}

/// Connects and logs in, panicking on failure.
pub async fn login(session: &TestSession) {
    session.handle.connect().await.expect("connect should succeed");
    session.handle.login().await.expect("login should succeed");
}

/// Waits for the next directory snapshot, skipping other events.
pub async fn next_directory(rx: &mut broadcast::Receiver<SessionEvent>) -> Arc<PeerRegistry> {
    timeout(Duration::from_secs(5), async {
        loop {
            if let SessionEvent::DirectoryChanged { directory } = rx.recv().await.unwrap() {
                return directory;
            }
        }
    })
    .await
    .expect("timed out waiting for DirectoryChanged")
}

pub fn record(username: &str, host: &str, subjects: &[&str]) -> CascaderRecord {
    CascaderRecord::new(username, host, subjects.iter().copied())
}
