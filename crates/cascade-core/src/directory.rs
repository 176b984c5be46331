//! The peer directory: every known cascader except the local user.
//!
//! `PeerRegistry` is a plain in-memory map with a query/filter algebra on
//! top. It does no I/O and holds no locks; the session actor owns the only
//! mutable copy and publishes immutable snapshots to readers.
//!
//! # Invariants
//!
//! - The local username is never stored, whatever sequence of mutations is
//!   applied.
//! - Entries with an empty subject set are kept (the peer is still joined)
//!   but never returned by [`PeerRegistry::find`] or [`PeerRegistry::query`].
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()`, `panic!()` or indexing. Lookup misses are
//! reported as [`RegistryError::PeerNotFound`] and logged by the caller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::lab::{LabId, LabResolver, NoLabs};
use crate::peer::{PeerEntry, PeerMatch};
use crate::subject::{Subject, SubjectSet};

// ============================================================================
// Query
// ============================================================================

/// Filters for [`PeerRegistry::query`] and [`PeerRegistry::find_first`].
///
/// Unset filters match everything. Set filters are combined with AND.
/// `username` is an exact lookup and cannot be combined with the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerQuery {
    pub username: Option<String>,
    pub lab: Option<LabId>,
    pub subjects: Option<SubjectSet>,
    pub host: Option<String>,
}

impl PeerQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn lab(mut self, lab: impl Into<LabId>) -> Self {
        self.lab = Some(lab.into());
        self
    }

    pub fn subjects<I, S>(mut self, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Subject>,
    {
        self.subjects = Some(subjects.into_iter().map(Into::into).collect());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Returns true if any filter other than `username` is set.
    #[must_use]
    pub fn has_filters(&self) -> bool {
        self.lab.is_some() || self.subjects.is_some() || self.host.is_some()
    }
}

// ============================================================================
// Peer Registry
// ============================================================================

/// Authoritative snapshot of all known peers except the local user.
///
/// Cloning is cheap enough for copy-on-write at the expected directory sizes
/// (tens to low hundreds of peers); the resolver is shared.
#[derive(Clone)]
pub struct PeerRegistry {
    /// Username excluded from the directory by construction
    local_username: String,

    /// Used only by the lab filter
    resolver: Arc<dyn LabResolver>,

    peers: HashMap<String, PeerEntry>,

    /// Incremented on every successful mutation
    version: u64,
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("local_username", &self.local_username)
            .field("peers", &self.peers)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl PeerRegistry {
    /// Creates an empty directory for `local_username`.
    pub fn new(local_username: impl Into<String>, resolver: Arc<dyn LabResolver>) -> Self {
        Self {
            local_username: local_username.into(),
            resolver,
            peers: HashMap::new(),
            version: 0,
        }
    }

    /// Creates an empty directory with no lab information.
    pub fn without_labs(local_username: impl Into<String>) -> Self {
        Self::new(local_username, Arc::new(NoLabs))
    }

    pub fn local_username(&self) -> &str {
        &self.local_username
    }

    /// Mutation counter, for change detection by the owner.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of stored entries, tombstones included.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Raw entry access, tombstones included.
    pub fn entry(&self, username: &str) -> Option<&PeerEntry> {
        self.peers.get(username)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Inserts or wholesale replaces a peer.
    ///
    /// Returns `false` without touching the directory when `username` is the
    /// local user.
    pub fn upsert_peer<I, S>(&mut self, username: &str, host: &str, subjects: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<Subject>,
    {
        if username == self.local_username {
            debug!(username, "Ignoring local user in peer directory");
            return false;
        }

        let subjects: SubjectSet = subjects.into_iter().map(Into::into).collect();
        debug!(
            username,
            host,
            subjects = subjects.len(),
            "Peer upserted"
        );
        self.peers
            .insert(username.to_string(), PeerEntry::new(host, subjects));
        self.bump();
        true
    }

    /// Drops every entry, ahead of adopting a full cascader list.
    pub fn clear(&mut self) {
        if !self.peers.is_empty() {
            self.peers.clear();
            self.bump();
        }
    }

    /// Removes a peer, returning its last entry.
    ///
    /// # Errors
    ///
    /// `RegistryError::PeerNotFound` if the peer is absent. This happens
    /// legitimately for the local user's own identity.
    pub fn remove_peer(&mut self, username: &str) -> RegistryResult<PeerEntry> {
        let entry = self
            .peers
            .remove(username)
            .ok_or_else(|| RegistryError::not_found(username))?;
        self.bump();
        Ok(entry)
    }

    /// Replaces the peer's subjects with their intersection with `subjects`.
    ///
    /// # Errors
    ///
    /// `RegistryError::PeerNotFound` if the peer is absent.
    pub fn narrow_subjects(&mut self, username: &str, subjects: &SubjectSet) -> RegistryResult<()> {
        self.modify_subjects(username, |current| {
            current.retain(|s| subjects.contains(s));
        })
    }

    /// Adds `subjects` to the peer's set.
    ///
    /// # Errors
    ///
    /// `RegistryError::PeerNotFound` if the peer is absent.
    pub fn add_subjects(&mut self, username: &str, subjects: &SubjectSet) -> RegistryResult<()> {
        self.modify_subjects(username, |current| {
            current.extend(subjects.iter().cloned());
        })
    }

    /// Removes `subjects` from the peer's set. The entry stays even if the
    /// set becomes empty.
    ///
    /// # Errors
    ///
    /// `RegistryError::PeerNotFound` if the peer is absent.
    pub fn remove_subjects(&mut self, username: &str, subjects: &SubjectSet) -> RegistryResult<()> {
        self.modify_subjects(username, |current| {
            current.retain(|s| !subjects.contains(s));
        })
    }

    fn modify_subjects<F>(&mut self, username: &str, apply: F) -> RegistryResult<()>
    where
        F: FnOnce(&mut SubjectSet),
    {
        let entry = self
            .peers
            .get_mut(username)
            .ok_or_else(|| RegistryError::not_found(username))?;
        apply(&mut entry.subjects);
        debug!(
            username,
            subjects = entry.subjects.len(),
            "Peer subjects changed"
        );
        self.bump();
        Ok(())
    }

    fn bump(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Exact lookup. Tombstoned peers are reported as absent.
    pub fn find(&self, username: &str) -> Option<PeerMatch<'_>> {
        let (name, entry) = self.peers.get_key_value(username)?;
        if entry.is_tombstone() {
            return None;
        }
        Some(PeerMatch {
            username: name,
            host: &entry.host,
            subjects: &entry.subjects,
        })
    }

    /// Lazily yields every peer offering subjects that passes all set filters.
    ///
    /// The `username` field of the query is ignored here; use
    /// [`find_first`](Self::find_first) for username lookups. Iteration order
    /// is unspecified. The returned iterator can be cloned to restart it.
    pub fn query<'a>(
        &'a self,
        query: &'a PeerQuery,
    ) -> impl Iterator<Item = PeerMatch<'a>> + Clone + 'a {
        self.peers
            .iter()
            .filter(move |(_, entry)| self.matches(entry, query))
            .map(|(name, entry)| PeerMatch {
                username: name,
                host: &entry.host,
                subjects: &entry.subjects,
            })
    }

    /// Returns the first peer matching `query`.
    ///
    /// A username-only query is an exact [`find`](Self::find).
    ///
    /// # Errors
    ///
    /// `RegistryError::InvalidQuery` if a username is combined with any other
    /// filter.
    pub fn find_first<'a>(&'a self, query: &'a PeerQuery) -> RegistryResult<Option<PeerMatch<'a>>> {
        match &query.username {
            Some(_) if query.has_filters() => Err(RegistryError::InvalidQuery {
                reason: "username cannot be combined with other filters".to_string(),
            }),
            Some(username) => Ok(self.find(username)),
            None => Ok(self.query(query).next()),
        }
    }

    fn matches(&self, entry: &PeerEntry, query: &PeerQuery) -> bool {
        if entry.is_tombstone() {
            return false;
        }

        if let Some(host) = &query.host {
            if *host != entry.host {
                return false;
            }
        }

        if let Some(lab) = &query.lab {
            if self.resolver.lab_from_hostname(&entry.host).as_ref() != Some(lab) {
                return false;
            }
        }

        // An empty subject filter is treated as unset
        match &query.subjects {
            Some(subjects) if !subjects.is_empty() => entry.offers_any(subjects),
            _ => true,
        }
    }
}
