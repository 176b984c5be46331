//! Host to lab resolution.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A physical or network location, e.g. a teaching lab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabId(String);

impl LabId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LabId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LabId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Maps a peer's host to the lab it sits in.
///
/// Injected into the peer directory; only the lab filter of a query uses it.
/// Hosts the resolver does not know return `None` and never match a lab.
pub trait LabResolver: Send + Sync {
    fn lab_from_hostname(&self, host: &str) -> Option<LabId>;
}

/// Resolver that knows no labs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLabs;

impl LabResolver for NoLabs {
    fn lab_from_hostname(&self, _host: &str) -> Option<LabId> {
        None
    }
}

/// Resolver backed by a fixed host table.
///
/// Usually built from the `[labs]` section of the client config, where each
/// lab lists the hosts it contains.
#[derive(Debug, Clone, Default)]
pub struct StaticLabResolver {
    hosts: HashMap<String, LabId>,
}

impl StaticLabResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a resolver from `lab -> hosts` entries.
    ///
    /// A host listed under two labs resolves to whichever was inserted last.
    pub fn from_labs<I, H>(labs: I) -> Self
    where
        I: IntoIterator<Item = (String, H)>,
        H: IntoIterator<Item = String>,
    {
        let mut resolver = Self::new();
        for (lab, hosts) in labs {
            for host in hosts {
                resolver.insert(host, LabId::new(lab.clone()));
            }
        }
        resolver
    }

    pub fn insert(&mut self, host: impl Into<String>, lab: LabId) {
        self.hosts.insert(host.into(), lab);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl LabResolver for StaticLabResolver {
    fn lab_from_hostname(&self, host: &str) -> Option<LabId> {
        self.hosts.get(host).cloned()
    }
}
