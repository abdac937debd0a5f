use pv_types::VersionKey;

use crate::chain::VersionChain;

/// Bounds the number of revisions a replica retains per record triple.
///
/// Replicas accumulate history independently with no network-wide garbage
/// collection, so every accepted write is followed by a prune.
#[derive(Clone, Copy, Debug)]
pub struct VersionPruner {
    max_versions: usize,
}

impl VersionPruner {
    /// A pruner keeping at most `max_versions` revisions (never fewer than 1).
    pub fn new(max_versions: usize) -> Self {
        Self {
            max_versions: max_versions.max(1),
        }
    }

    pub fn max_versions(&self) -> usize {
        self.max_versions
    }

    /// Drop the oldest entries until the chain fits the bound.
    ///
    /// Returns the evicted version keys, oldest first, so the caller can
    /// delete their payloads. The head is never evicted.
    pub fn prune(&self, chain: &mut VersionChain) -> Vec<VersionKey> {
        let mut evicted = Vec::new();
        while chain.len() > self.max_versions {
            match chain.pop_oldest() {
                Some((version, _)) => evicted.push(version),
                None => break,
            }
        }
        evicted
    }
}
