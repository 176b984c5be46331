//! Client configuration.
//!
//! Settings are read from a TOML file (by default
//! `$XDG_CONFIG_HOME/cascade/config.toml`). Every key is optional; a
//! missing file yields the defaults.
//!
//! ```toml
//! server_host = "broker.example.org"
//! server_port = 5010
//! retry_interval_secs = 5
//! legacy_mode = false
//!
//! [labs]
//! "tb-1" = ["tb1-pc01", "tb1-pc02"]
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use cascade_core::{StaticLabResolver, SubjectAlgebra};

use crate::tcp::TcpConfig;

/// Default broker host.
pub const DEFAULT_SERVER_HOST: &str = "localhost";

/// Default broker port.
pub const DEFAULT_SERVER_PORT: u16 = 5010;

/// Default interval between reconnect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// Session Config
// ============================================================================

/// Settings the session engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Excluded from the peer directory.
    pub local_username: String,

    /// Fixed delay between reconnect attempts.
    pub retry_interval: Duration,

    /// `Legacy` reproduces the historical set algebra and cascading flag.
    pub subject_algebra: SubjectAlgebra,
}

impl SessionConfig {
    pub fn new(local_username: impl Into<String>) -> Self {
        Self {
            local_username: local_username.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            subject_algebra: SubjectAlgebra::default(),
        }
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_subject_algebra(mut self, subject_algebra: SubjectAlgebra) -> Self {
        self.subject_algebra = subject_algebra;
        self
    }
}

// ============================================================================
// Client Config
// ============================================================================

/// Errors loading the config file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Full client configuration as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    pub username: String,
    pub hostname: String,
    pub retry_interval_secs: u64,
    pub legacy_mode: bool,
    /// Lab name to the hosts it contains
    pub labs: BTreeMap<String, Vec<String>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            username: env_username(),
            hostname: env_hostname(),
            retry_interval_secs: DEFAULT_RETRY_INTERVAL.as_secs(),
            legacy_mode: false,
            labs: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cascade").join("config.toml"))
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                debug!(path = %path.display(), "Loaded config file");
                Self::from_toml_str(&contents)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Loads the file at [`default_path`](Self::default_path), or defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn session_config(&self) -> SessionConfig {
        let subject_algebra = if self.legacy_mode {
            SubjectAlgebra::Legacy
        } else {
            SubjectAlgebra::Union
        };
        SessionConfig::new(self.username.clone())
            .with_retry_interval(Duration::from_secs(self.retry_interval_secs))
            .with_subject_algebra(subject_algebra)
    }

    pub fn tcp_config(&self) -> TcpConfig {
        TcpConfig {
            addr: self.server_addr(),
            username: self.username.clone(),
            hostname: self.hostname.clone(),
        }
    }

    pub fn lab_resolver(&self) -> StaticLabResolver {
        StaticLabResolver::from_labs(
            self.labs
                .iter()
                .map(|(lab, hosts)| (lab.clone(), hosts.clone())),
        )
    }
}

fn env_username() -> String {
    env::var("LOGNAME")
        .or_else(|_| env::var("USER"))
        .unwrap_or_else(|_| "anonymous".to_string())
}

fn env_hostname() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
