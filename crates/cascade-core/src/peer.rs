//! Peer entities as stored in the directory and as exchanged with the broker.

use serde::{Deserialize, Serialize};

use crate::subject::{Subject, SubjectSet};

/// One other user known to be present.
///
/// An entry whose subject set is empty is a tombstone: it stays in the
/// directory while the peer is joined but is never returned by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub host: String,
    pub subjects: SubjectSet,
}

impl PeerEntry {
    pub fn new(host: impl Into<String>, subjects: SubjectSet) -> Self {
        Self {
            host: host.into(),
            subjects,
        }
    }

    /// Returns true if the peer currently offers no subjects.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Returns true if the peer offers at least one of `subjects`.
    #[must_use]
    pub fn offers_any(&self, subjects: &SubjectSet) -> bool {
        !self.subjects.is_disjoint(subjects)
    }
}

/// A borrowed `(username, host, subjects)` triple yielded by directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerMatch<'a> {
    pub username: &'a str,
    pub host: &'a str,
    pub subjects: &'a SubjectSet,
}

impl PeerMatch<'_> {
    /// Converts the borrowed match into an owned record.
    pub fn to_record(&self) -> CascaderRecord {
        CascaderRecord {
            username: self.username.to_string(),
            host: self.host.to_string(),
            subjects: self.subjects.iter().cloned().collect(),
        }
    }
}

/// Owned cascader triple, as delivered by the broker's cascader list and
/// join notifications.
///
/// Subjects are kept as a list because the broker may send duplicates; the
/// directory collapses them on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascaderRecord {
    pub username: String,
    pub host: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

impl CascaderRecord {
    pub fn new<I, S>(username: impl Into<String>, host: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Subject>,
    {
        Self {
            username: username.into(),
            host: host.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::subject_set;

    #[test]
    fn test_tombstone() {
        let entry = PeerEntry::new("host1", SubjectSet::new());
        assert!(entry.is_tombstone());

        let entry = PeerEntry::new("host1", subject_set(["maths"]));
        assert!(!entry.is_tombstone());
    }

    #[test]
    fn test_offers_any() {
        let entry = PeerEntry::new("host1", subject_set(["maths", "java"]));
        assert!(entry.offers_any(&subject_set(["java", "haskell"])));
        assert!(!entry.offers_any(&subject_set(["haskell"])));
    }

    #[test]
    fn test_record_deserializes_without_subjects() {
        let record: CascaderRecord =
            serde_json::from_str(r#"{"username":"bob","host":"host1"}"#).unwrap();
        assert_eq!(record.username, "bob");
        assert!(record.subjects.is_empty());
    }
}
