use pv_types::VersionedKey;

use crate::chain::VersionChain;
use crate::outcome::PutOutcome;
use crate::record::VersionedRecord;

/// Decides whether a replica accepts a write, looking only at its own
/// version chain for the key.
///
/// The validator never talks to other replicas, so the same write can be
/// accepted at one replica and rejected at another. Reconciling those
/// verdicts is the put coordinator's job.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageValidator;

impl StorageValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `incoming` against the replica's `chain` for `key`.
    ///
    /// `stored` is the record this replica already holds under
    /// `key.version`, if any.
    pub fn validate(
        &self,
        key: &VersionedKey,
        incoming: &VersionedRecord,
        chain: &VersionChain,
        stored: Option<&VersionedRecord>,
    ) -> PutOutcome {
        if incoming.is_protection_change() {
            return PutOutcome::Accepted;
        }

        if key.version != incoming.version {
            return PutOutcome::RejectedGeneric;
        }

        if key.version.is_zero() {
            return if chain.is_empty() || chain.is_single_unversioned() {
                PutOutcome::Accepted
            } else {
                PutOutcome::VersionConflictMissingVersionKey
            };
        }

        // A record that was written unversioned stays unversioned.
        if chain.is_single_unversioned() {
            return PutOutcome::VersionConflictMissingVersionKey;
        }

        // Replaying a revision this replica already holds byte for byte (a
        // retry after a lost acknowledgement) is not a fork. Anything else
        // under an existing version falls through to the chain rules.
        if chain.based_on(&key.version) == Some(incoming.based_on)
            && stored.is_some_and(|s| is_same_revision(s, incoming))
        {
            return PutOutcome::Accepted;
        }

        if incoming.based_on.is_zero() {
            return if chain.is_empty() {
                PutOutcome::Accepted
            } else {
                PutOutcome::VersionConflictMissingBasedOn
            };
        }

        // The parent may have been pruned from this replica, or never
        // reached it. Defer to the writer's causal claim.
        let Some(head) = chain.head_key() else {
            return PutOutcome::Accepted;
        };

        if head != incoming.based_on {
            return PutOutcome::VersionConflict;
        }

        if head.timestamp_ms() < key.version.timestamp_ms() {
            PutOutcome::Accepted
        } else {
            PutOutcome::VersionConflictStaleTimestamp
        }
    }
}

fn is_same_revision(stored: &VersionedRecord, incoming: &VersionedRecord) -> bool {
    stored.based_on == incoming.based_on && stored.content_hash() == incoming.content_hash()
}
