//! Cascade Core - Shared types for the cascader peer directory
//!
//! This crate provides the domain types shared between the wire protocol
//! (cascade-protocol) and the session client (cascade-client): subjects,
//! peers, the lab resolver seam, and the in-memory peer directory.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod directory;
pub mod error;
pub mod lab;
pub mod peer;
pub mod subject;

// Re-exports for convenience
pub use directory::{PeerQuery, PeerRegistry};
pub use error::{RegistryError, RegistryResult};
pub use lab::{LabId, LabResolver, NoLabs, StaticLabResolver};
pub use peer::{CascaderRecord, PeerEntry, PeerMatch};
pub use subject::{subject_set, Subject, SubjectAlgebra, SubjectSet};
