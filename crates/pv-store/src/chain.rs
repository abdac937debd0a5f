use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use pv_types::VersionKey;

/// Replica-local version history of one record triple.
///
/// Maps each retained `version` to the `based_on` key it was written on top
/// of, ordered oldest first by the timestamp embedded in the version key.
/// The chain holds at most one root and the validator only ever appends
/// successors of the current head.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionChain {
    entries: BTreeMap<VersionKey, VersionKey>,
}

impl VersionChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The current head: `(version, based_on)` of the newest entry.
    pub fn head(&self) -> Option<(VersionKey, VersionKey)> {
        self.entries.last_key_value().map(|(v, b)| (*v, *b))
    }

    pub fn head_key(&self) -> Option<VersionKey> {
        self.entries.last_key_value().map(|(v, _)| *v)
    }

    pub fn oldest_key(&self) -> Option<VersionKey> {
        self.entries.first_key_value().map(|(v, _)| *v)
    }

    pub fn contains(&self, version: &VersionKey) -> bool {
        self.entries.contains_key(version)
    }

    /// The parent recorded for `version`, if retained.
    pub fn based_on(&self, version: &VersionKey) -> Option<VersionKey> {
        self.entries.get(version).copied()
    }

    /// Returns `true` when the only entry is the unversioned sentinel.
    pub fn is_single_unversioned(&self) -> bool {
        self.entries.len() == 1 && self.entries.contains_key(&VersionKey::ZERO)
    }

    pub fn insert(&mut self, version: VersionKey, based_on: VersionKey) {
        self.entries.insert(version, based_on);
    }

    pub fn remove(&mut self, version: &VersionKey) -> Option<VersionKey> {
        self.entries.remove(version)
    }

    /// Remove and return the oldest entry.
    pub fn pop_oldest(&mut self) -> Option<(VersionKey, VersionKey)> {
        self.entries.pop_first()
    }

    /// Number of entries claiming to be a root.
    pub fn root_count(&self) -> usize {
        self.entries.values().filter(|b| b.is_zero()).count()
    }

    /// Iterate `(version, based_on)` oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&VersionKey, &VersionKey)> {
        self.entries.iter()
    }

    /// Compact view of this chain without payloads.
    pub fn digest(&self) -> ChainDigest {
        ChainDigest {
            entries: self.entries.clone(),
        }
    }
}

/// The `(version, based_on)` pairs a replica reports for a triple, used by
/// the fork detector without transferring payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Vec<(VersionKey, VersionKey)>",
    into = "Vec<(VersionKey, VersionKey)>"
)]
pub struct ChainDigest {
    entries: BTreeMap<VersionKey, VersionKey>,
}

impl From<Vec<(VersionKey, VersionKey)>> for ChainDigest {
    fn from(pairs: Vec<(VersionKey, VersionKey)>) -> Self {
        Self::from_pairs(pairs)
    }
}

impl From<ChainDigest> for Vec<(VersionKey, VersionKey)> {
    fn from(digest: ChainDigest) -> Self {
        digest.entries.into_iter().collect()
    }
}

impl ChainDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (VersionKey, VersionKey)>) -> Self {
        Self {
            entries: pairs.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, version: &VersionKey) -> bool {
        self.entries.contains_key(version)
    }

    pub fn based_on(&self, version: &VersionKey) -> Option<VersionKey> {
        self.entries.get(version).copied()
    }

    pub fn head(&self) -> Option<(VersionKey, VersionKey)> {
        self.entries.last_key_value().map(|(v, b)| (*v, *b))
    }

    /// The first entry ordered strictly after `version`.
    ///
    /// For the zero key this is the oldest entry that is not itself the
    /// unversioned sentinel.
    pub fn next_after(&self, version: &VersionKey) -> Option<(VersionKey, VersionKey)> {
        self.entries
            .range((Bound::Excluded(*version), Bound::Unbounded))
            .next()
            .map(|(v, b)| (*v, *b))
    }

    /// Union of two digests.
    pub fn merge(&mut self, other: &ChainDigest) {
        for (v, b) in &other.entries {
            self.entries.insert(*v, *b);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VersionKey, &VersionKey)> {
        self.entries.iter()
    }
}
