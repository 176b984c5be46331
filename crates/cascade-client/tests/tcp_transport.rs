//! TCP transport tests against a fake broker on a loopback socket.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use cascade_client::{
    spawn_session, ConnectionState, PushEvent, SessionConfig, SessionError, SessionEvent,
    TcpConfig, TcpTransport, Transport, TransportError,
};
use cascade_core::{subject_set, NoLabs};
use cascade_protocol::{ClientMessage, Request, ServerMessage};

// ============================================================================
// Fake Broker
// ============================================================================

/// How the fake broker answers.
#[derive(Clone, Copy)]
enum Behavior {
    /// Answer everything, and announce carol after login
    Normal,
    /// Reject every login
    RejectLogin,
    /// Accept logins but report an incompatible protocol version
    FutureVersion,
    /// Close the connection after reading the first request
    HangUp,
    /// Send `FLOOD` joins ahead of the login response
    Flood,
    /// Close the connection once the login restore has been answered
    DropAfterRestore,
}

/// More pushes than the transport's push channel holds.
const FLOOD: usize = 300;

async fn spawn_broker(behavior: Behavior) -> String {
    spawn_counting_broker(behavior).await.0
}

/// Also returns the number of connections accepted so far.
async fn spawn_counting_broker(behavior: Behavior) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(serve(stream, behavior));
        }
    });

    (addr, accepted)
}

async fn serve(stream: TcpStream, behavior: Behavior) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if matches!(behavior, Behavior::HangUp) {
            return;
        }

        let message: ClientMessage = serde_json::from_str(&line).unwrap();
        let id = message.id;
        let mut replies = Vec::new();
        let hang_up = matches!(
            (&message.request, behavior),
            (Request::AddSubjects { .. }, Behavior::DropAfterRestore)
        );

        match (message.request, behavior) {
            (Request::Login { .. }, Behavior::RejectLogin) => {
                replies.push(ServerMessage::Error {
                    id,
                    message: "unknown user".to_string(),
                    code: Some("AUTH".to_string()),
                });
            }
            (Request::Login { username, .. }, Behavior::Flood) => {
                for i in 0..FLOOD {
                    replies.push(ServerMessage::CascaderJoined {
                        username: format!("peer{i}"),
                        host: format!("tb1-pc{i:03}"),
                        subjects: vec!["maths".into()],
                    });
                }
                replies.push(ServerMessage::response(id, json!({ "token": username })));
            }
            (Request::Login { username, .. }, Behavior::FutureVersion) => {
                replies.push(ServerMessage::response(
                    id,
                    json!({ "token": username, "protocol_version": { "major": 2, "minor": 0 } }),
                ));
            }
            (Request::Login { username, .. }, _) => {
                replies.push(ServerMessage::response(id, json!({ "token": username })));
                replies.push(ServerMessage::CascaderJoined {
                    username: "carol".to_string(),
                    host: "tb1-pc07".to_string(),
                    subjects: vec!["java".into()],
                });
            }
            (Request::GetSubjectList, _) => {
                replies.push(ServerMessage::response(id, json!(["maths"])));
            }
            (Request::GetCascaderList, _) => {
                replies.push(ServerMessage::response(
                    id,
                    json!([
                        { "username": "bob", "host": "tb1-pc01", "subjects": ["maths", "maths"] },
                        { "username": "me", "host": "tb1-pc02", "subjects": ["maths"] }
                    ]),
                ));
            }
            _ => replies.push(ServerMessage::response(id, json!(null))),
        }

        for reply in replies {
            let mut out = serde_json::to_string(&reply).unwrap();
            out.push('\n');
            if writer.write_all(out.as_bytes()).await.is_err() {
                return;
            }
        }
        if hang_up {
            return;
        }
    }
}

fn tcp_config(addr: String) -> TcpConfig {
    TcpConfig {
        addr,
        username: "me".to_string(),
        hostname: "tb1-pc02".to_string(),
    }
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_request_response_and_push() {
    let addr = spawn_broker(Behavior::Normal).await;
    let (transport, mut pushes) = TcpTransport::new(tcp_config(addr));

    transport.connect().await.unwrap();
    let token = transport.login().await.unwrap();
    assert_eq!(token.as_str(), "me");

    let cascaders = transport.get_cascader_list().await.unwrap();
    assert_eq!(cascaders.len(), 2);
    assert_eq!(transport.get_subject_list().await.unwrap(), subject_set(["maths"]));
    transport.add_subjects(&subject_set(["java"])).await.unwrap();

    let push = timeout(Duration::from_secs(5), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        push,
        PushEvent::PeerJoined {
            username: "carol".to_string(),
            host: "tb1-pc07".to_string(),
            subjects: subject_set(["java"]),
        }
    );
}

#[tokio::test]
async fn test_remote_error_keeps_code() {
    let addr = spawn_broker(Behavior::RejectLogin).await;
    let (transport, _pushes) = TcpTransport::new(tcp_config(addr));

    transport.connect().await.unwrap();
    let err = transport.login().await.unwrap_err();

    assert_eq!(
        err,
        TransportError::Remote {
            message: "unknown user".to_string(),
            code: Some("AUTH".to_string()),
        }
    );
}

#[tokio::test]
async fn test_incompatible_protocol_version() {
    let addr = spawn_broker(Behavior::FutureVersion).await;
    let (transport, _pushes) = TcpTransport::new(tcp_config(addr));

    transport.connect().await.unwrap();
    let err = transport.login().await.unwrap_err();

    assert!(matches!(err, TransportError::Protocol(_)));
    assert!(!err.is_connectivity());
}

#[tokio::test]
async fn test_hang_up_fails_in_flight_call() {
    let addr = spawn_broker(Behavior::HangUp).await;
    let (transport, _pushes) = TcpTransport::new(tcp_config(addr));

    transport.connect().await.unwrap();
    let result = timeout(Duration::from_secs(5), transport.login())
        .await
        .unwrap();

    assert_eq!(result, Err(TransportError::NotConnected));
    assert_eq!(
        transport.start_cascading().await,
        Err(TransportError::NotConnected)
    );
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (transport, _pushes) = TcpTransport::new(tcp_config(addr));
    let err = transport.connect().await.unwrap_err();

    assert!(matches!(err, TransportError::ConnectFailed(_)));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn test_close_then_reconnect() {
    let addr = spawn_broker(Behavior::Normal).await;
    let (transport, _pushes) = TcpTransport::new(tcp_config(addr));

    transport.connect().await.unwrap();
    transport.close().await;
    assert_eq!(transport.stop_cascading().await, Err(TransportError::NotConnected));

    transport.connect().await.unwrap();
    transport.stop_cascading().await.unwrap();
}

// ============================================================================
// Session over TCP
// ============================================================================

#[tokio::test]
async fn test_session_over_tcp() {
    let addr = spawn_broker(Behavior::Normal).await;
    let (transport, pushes) = TcpTransport::new(tcp_config(addr));
    let session = spawn_session(
        Arc::new(transport),
        pushes,
        Arc::new(NoLabs),
        SessionConfig::new("me"),
        CancellationToken::new(),
    );
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    session.login().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::LoggedIn);

    let snapshot = session.snapshot().await.unwrap();
    assert_eq!(snapshot.desired_subjects, subject_set(["maths"]));

    // carol's join is queued behind the login bootstrap, so it lands after
    // the cascader list replaced the directory
    let directory = timeout(Duration::from_secs(5), async {
        loop {
            let directory = session.directory();
            if directory.find("carol").is_some() {
                return directory;
            }
            if let SessionEvent::DirectoryChanged { directory } = events.recv().await.unwrap() {
                if directory.find("carol").is_some() {
                    return directory;
                }
            }
        }
    })
    .await
    .expect("carol never joined");

    assert!(directory.find("bob").is_some());
    assert!(directory.entry("me").is_none());
    assert_eq!(directory.len(), 2);

    session.shutdown();
}

#[tokio::test]
async fn test_session_upstream_error_over_tcp() {
    let addr = spawn_broker(Behavior::RejectLogin).await;
    let (transport, pushes) = TcpTransport::new(tcp_config(addr));
    let session = spawn_session(
        Arc::new(transport),
        pushes,
        Arc::new(NoLabs),
        SessionConfig::new("me"),
        CancellationToken::new(),
    );

    session.connect().await.unwrap();
    let err = session.login().await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::Transport(TransportError::Remote { .. })
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_push_burst_during_login() {
    let addr = spawn_broker(Behavior::Flood).await;
    let (transport, pushes) = TcpTransport::new(tcp_config(addr));
    let session = spawn_session(
        Arc::new(transport),
        pushes,
        Arc::new(NoLabs),
        SessionConfig::new("me"),
        CancellationToken::new(),
    );

    session.connect().await.unwrap();
    timeout(Duration::from_secs(5), session.login())
        .await
        .expect("login blocked behind the push burst")
        .unwrap();
    assert_eq!(session.connection_state(), ConnectionState::LoggedIn);

    // Joins received during login are applied once it completes
    session.snapshot().await.unwrap();
    let directory = session.directory();
    assert_eq!(directory.len(), FLOOD + 1);
    assert!(directory.find("bob").is_some());
    assert!(directory.find("peer299").is_some());

    session.shutdown();
}

#[tokio::test]
async fn test_idle_link_loss_schedules_reconnect() {
    let (addr, accepted) = spawn_counting_broker(Behavior::DropAfterRestore).await;
    let (transport, pushes) = TcpTransport::new(tcp_config(addr));
    let session = spawn_session(
        Arc::new(transport),
        pushes,
        Arc::new(NoLabs),
        SessionConfig::new("me"),
        CancellationToken::new(),
    );
    let mut events = session.subscribe();

    session.connect().await.unwrap();
    session.login().await.unwrap();

    // Nothing is in flight when the broker hangs up
    timeout(Duration::from_secs(5), async {
        loop {
            if let SessionEvent::ConnectionChanged {
                state: ConnectionState::LoggedIn,
            } = events.recv().await.unwrap()
            {
                break;
            }
        }
        loop {
            if let SessionEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
            } = events.recv().await.unwrap()
            {
                break;
            }
        }
    })
    .await
    .expect("dead link went unnoticed");

    // The first reconnect attempt is immediate
    timeout(Duration::from_secs(5), async {
        while accepted.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("no reconnect attempt");

    session.shutdown();
}
