//! Cascade Client - session synchronization with the directory broker
//!
//! - `session` - Session actor: login bootstrap, subject reconciliation,
//!   reconnect loop and the live peer directory
//! - `transport` - The seam to the broker, plus `tcp`, its TCP implementation
//! - `events` - Change notifications for UI consumers
//! - `config` - TOML client configuration
//!
//! # Architecture
//!
//! ```text
//!                 commands              request/response
//!  SessionHandle ──────────▶ SessionActor ◀──────────▶ Transport ◀──▶ broker
//!       ▲                   │    ▲                         │
//!       │ watch             │    └──────── pushes ─────────┘
//!       └───────────────────┤
//!                           │ broadcast
//!                           ▼
//!                       EventBus ──▶ subscribers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod tcp;
pub mod transport;

pub use config::{ClientConfig, ConfigError, SessionConfig};
pub use error::{SessionError, SessionResult, TransportError};
pub use events::{EventBus, SessionEvent};
pub use session::{spawn_session, ConnectionState, SessionHandle, SessionSnapshot};
pub use tcp::{TcpConfig, TcpTransport};
pub use transport::{HelpRequest, LoginToken, PushEvent, Transport};
