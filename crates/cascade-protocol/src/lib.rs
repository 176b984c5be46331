//! Cascade Protocol - Wire protocol for broker communication
//!
//! This crate provides message types and parsing for the newline-delimited
//! JSON protocol spoken between the cascade client and the directory broker.

pub mod message;
pub mod version;

pub use message::{
    decode_result, CascaderList, ClientMessage, LoginResult, ProtocolError, Request, RequestId,
    ServerMessage, SubjectList,
};
pub use version::{ProtocolVersion, VersionError};
