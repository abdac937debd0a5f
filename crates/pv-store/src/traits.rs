use pv_types::{KeyTriple, VersionKey};

use crate::chain::ChainDigest;
use crate::error::StoreResult;
use crate::outcome::{PutOutcome, RemoveOutcome};
use crate::record::{PutRequest, RemoveRequest, VersionedRecord};

/// Storage held by one replica peer.
///
/// Implementations must satisfy these invariants:
/// - Writes to one triple are processed one at a time; different triples
///   proceed independently.
/// - Every put is validated against the replica's own chain only.
/// - An accepted put is followed by a prune of that triple's history.
/// - Validation verdicts are returned as outcomes; `Err` is reserved for
///   failures to evaluate the request at all.
pub trait ReplicaStore: Send + Sync {
    /// Validate and, if accepted, apply a write.
    fn put(&self, request: &PutRequest) -> StoreResult<PutOutcome>;

    /// Read a specific revision, or the newest live revision when
    /// `version` is `None`. Returns `Ok(None)` if nothing is stored.
    fn get(&self, triple: &KeyTriple, version: Option<VersionKey>)
        -> StoreResult<Option<VersionedRecord>>;

    /// The `(version, based_on)` view of the triple's chain.
    fn digest(&self, triple: &KeyTriple) -> StoreResult<ChainDigest>;

    /// Remove one revision, or the whole triple.
    fn remove(&self, request: &RemoveRequest) -> StoreResult<RemoveOutcome>;

    /// Number of retained revisions for the triple.
    fn chain_len(&self, triple: &KeyTriple) -> StoreResult<usize> {
        Ok(self.digest(triple)?.len())
    }
}
