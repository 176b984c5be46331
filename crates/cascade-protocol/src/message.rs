//! Protocol message types for broker communication.
//!
//! Messages are newline-delimited JSON. Every client message is a request
//! carrying an `id`; the broker answers with a `response` or `error` echoing
//! that id. Push notifications arrive unsolicited at any time.

use cascade_core::{CascaderRecord, Subject};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::ProtocolVersion;

/// Correlates a response with the request that caused it.
pub type RequestId = u64;

// ============================================================================
// Client -> Broker
// ============================================================================

/// Requests the client can make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Identify this client; answered with a [`LoginResult`]
    Login { username: String, hostname: String },

    /// Answered with the list of subjects for this user
    GetSubjectList,

    /// Answered with every cascader currently joined
    GetCascaderList,

    AddSubjects { subjects: Vec<Subject> },

    RemoveSubjects { subjects: Vec<Subject> },

    StartCascading,

    StopCascading,
}

impl Request {
    /// Short name for logging.
    pub fn method(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::GetSubjectList => "get_subject_list",
            Self::GetCascaderList => "get_cascader_list",
            Self::AddSubjects { .. } => "add_subjects",
            Self::RemoveSubjects { .. } => "remove_subjects",
            Self::StartCascading => "start_cascading",
            Self::StopCascading => "stop_cascading",
        }
    }
}

/// Messages sent from client to broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    pub id: RequestId,

    #[serde(flatten)]
    pub request: Request,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(id: RequestId, request: Request) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            id,
            request,
        }
    }

    /// Serializes to a single JSON line without the trailing newline.
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }
}

// ============================================================================
// Broker -> Client
// ============================================================================

/// Messages sent from broker to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Successful answer to request `id`
    Response {
        id: RequestId,
        #[serde(default)]
        result: serde_json::Value,
    },

    /// Failed answer to request `id`
    Error {
        id: RequestId,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    CascaderJoined {
        username: String,
        host: String,
        #[serde(default)]
        subjects: Vec<Subject>,
    },

    CascaderLeft { username: String },

    CascaderAddedSubjects {
        username: String,
        subjects: Vec<Subject>,
    },

    CascaderRemovedSubjects {
        username: String,
        subjects: Vec<Subject>,
    },

    UserAskingForHelp {
        help_id: String,
        username: String,
        host: String,
        subject: Subject,
        #[serde(default)]
        description: String,
    },
}

impl ServerMessage {
    /// Parses one JSON line.
    pub fn parse_line(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line.trim()).map_err(ProtocolError::from)
    }

    /// Returns the request id for responses, `None` for pushes.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::Response { id, .. } | Self::Error { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Creates a response.
    pub fn response(id: RequestId, result: serde_json::Value) -> Self {
        Self::Response { id, result }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, message: &str) -> Self {
        Self::Error {
            id,
            message: message.to_string(),
            code: None,
        }
    }
}

/// Result payload of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResult {
    pub token: String,

    /// Sent by brokers that version their protocol; older ones omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,
}

/// Result payload of `get_cascader_list`.
pub type CascaderList = Vec<CascaderRecord>;

/// Result payload of `get_subject_list`.
pub type SubjectList = Vec<Subject>;

// ============================================================================
// Errors
// ============================================================================

/// Errors encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected result for {method}: {reason}")]
    UnexpectedResult { method: String, reason: String },
}

/// Decodes a response `result` into the payload type expected for `method`.
pub fn decode_result<T>(method: &str, result: serde_json::Value) -> Result<T, ProtocolError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(result).map_err(|e| ProtocolError::UnexpectedResult {
        method: method.to_string(),
        reason: e.to_string(),
    })
}
