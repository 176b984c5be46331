//! Subject identifiers and the set operations applied to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// A topic a user can ask for or offer help on.
///
/// Subjects are opaque to the client; the broker decides which ones exist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Creates a new Subject from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A set of subjects. Callers must not rely on iteration order.
pub type SubjectSet = BTreeSet<Subject>;

/// Builds a [`SubjectSet`] from anything that yields subject-like values.
///
/// Duplicates collapse.
pub fn subject_set<I, S>(subjects: I) -> SubjectSet
where
    I: IntoIterator<Item = S>,
    S: Into<Subject>,
{
    subjects.into_iter().map(Into::into).collect()
}

// ============================================================================
// Subject Algebra
// ============================================================================

/// How "subjects added" updates are folded into an existing set.
///
/// `Union` is the normal behavior. `Legacy` reproduces the historical
/// intersection semantics for compatibility with older brokers and clients
/// that relied on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectAlgebra {
    /// `current ∪ added`
    #[default]
    Union,
    /// `current ∩ added`
    Legacy,
}

impl SubjectAlgebra {
    /// Folds `added` into `current` according to this algebra.
    pub fn merge(self, current: &SubjectSet, added: &SubjectSet) -> SubjectSet {
        match self {
            Self::Union => current.union(added).cloned().collect(),
            Self::Legacy => current.intersection(added).cloned().collect(),
        }
    }

    /// Returns true for the historical intersection semantics.
    #[must_use]
    pub fn is_legacy(self) -> bool {
        matches!(self, Self::Legacy)
    }
}
