use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use pv_crypto::PublicKey;
use pv_types::{KeyTriple, VersionKey};

use crate::chain::{ChainDigest, VersionChain};
use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::outcome::{PutOutcome, RemoveOutcome};
use crate::pruner::VersionPruner;
use crate::record::{now_ms, PutRequest, RemoveRequest, VersionedRecord};
use crate::traits::ReplicaStore;
use crate::validator::StorageValidator;

/// Everything one replica keeps for a record triple.
#[derive(Debug, Default)]
struct Slot {
    chain: VersionChain,
    records: BTreeMap<VersionKey, VersionedRecord>,
    owner: Option<PublicKey>,
    /// Set once the slot has been unlinked from the map; writers that raced
    /// the unlink must fetch a fresh slot.
    retired: bool,
}

impl Slot {
    fn is_vacant(&self) -> bool {
        self.chain.is_empty() && self.owner.is_none()
    }
}

/// In-memory replica store for tests, simulations and embedding.
///
/// Each triple lives in its own slot behind a `Mutex`, so writes to one
/// triple are serialized while different triples proceed in parallel. The
/// slot map itself sits behind a `RwLock` and is only write-locked to add or
/// drop slots.
pub struct InMemoryReplicaStore {
    name: String,
    validator: StorageValidator,
    pruner: VersionPruner,
    slots: RwLock<HashMap<KeyTriple, Arc<Mutex<Slot>>>>,
}

impl InMemoryReplicaStore {
    pub fn new(name: impl Into<String>, config: &StorageConfig) -> StoreResult<Self> {
        config.validate()?;
        Ok(Self::with_parts(
            name,
            StorageValidator::new(),
            VersionPruner::new(config.max_versions),
        ))
    }

    /// Assemble a store from an explicit validator and pruner.
    pub fn with_parts(
        name: impl Into<String>,
        validator: StorageValidator,
        pruner: VersionPruner,
    ) -> Self {
        Self {
            name: name.into(),
            validator,
            pruner,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of triples with stored state.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_slots()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every record whose time to live has elapsed at `now_ms`.
    ///
    /// Returns the number of revisions removed.
    pub fn sweep_expired(&self, now_ms: u64) -> StoreResult<usize> {
        let slots: Vec<(KeyTriple, Arc<Mutex<Slot>>)> = self
            .read_slots()?
            .iter()
            .map(|(k, v)| (*k, Arc::clone(v)))
            .collect();

        let mut removed = 0;
        let mut vacated = Vec::new();
        for (triple, slot) in slots {
            let mut slot = lock_slot(&slot)?;
            let expired: Vec<VersionKey> = slot
                .records
                .iter()
                .filter(|(_, r)| r.is_expired(now_ms))
                .map(|(v, _)| *v)
                .collect();
            for version in &expired {
                slot.records.remove(version);
                slot.chain.remove(version);
            }
            removed += expired.len();
            if !expired.is_empty() && slot.chain.is_empty() {
                slot.owner = None;
                vacated.push(triple);
            }
        }

        for triple in vacated {
            self.drop_if_vacant(&triple)?;
        }
        if removed > 0 {
            debug!(replica = %self.name, removed, "swept expired revisions");
        }
        Ok(removed)
    }

    fn read_slots(
        &self,
    ) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<KeyTriple, Arc<Mutex<Slot>>>>> {
        self.slots
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write_slots(
        &self,
    ) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<KeyTriple, Arc<Mutex<Slot>>>>> {
        self.slots
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn existing_slot(&self, triple: &KeyTriple) -> StoreResult<Option<Arc<Mutex<Slot>>>> {
        Ok(self.read_slots()?.get(triple).cloned())
    }

    fn slot_or_insert(&self, triple: &KeyTriple) -> StoreResult<Arc<Mutex<Slot>>> {
        if let Some(slot) = self.existing_slot(triple)? {
            return Ok(slot);
        }
        let mut map = self.write_slots()?;
        Ok(Arc::clone(map.entry(*triple).or_default()))
    }

    /// Run `f` on the live slot for `triple`, creating it if needed.
    fn with_live_slot<R>(
        &self,
        triple: &KeyTriple,
        f: impl FnOnce(&mut Slot) -> R,
    ) -> StoreResult<R> {
        loop {
            let slot = self.slot_or_insert(triple)?;
            let mut guard = lock_slot(&slot)?;
            if !guard.retired {
                return Ok(f(&mut *guard));
            }
        }
    }

    fn drop_if_vacant(&self, triple: &KeyTriple) -> StoreResult<()> {
        let mut map = self.write_slots()?;
        let vacant = match map.get(triple) {
            Some(slot) => {
                let mut slot = lock_slot(slot)?;
                if slot.is_vacant() {
                    slot.retired = true;
                }
                slot.retired
            }
            None => false,
        };
        if vacant {
            map.remove(triple);
        }
        Ok(())
    }
}

fn lock_slot(slot: &Mutex<Slot>) -> StoreResult<std::sync::MutexGuard<'_, Slot>> {
    slot.lock()
        .map_err(|e| StoreError::LockPoisoned(e.to_string()))
}

impl ReplicaStore for InMemoryReplicaStore {
    fn put(&self, request: &PutRequest) -> StoreResult<PutOutcome> {
        let key = &request.key;
        if !request.verify_signature()? {
            warn!(replica = %self.name, key = %key, "put rejected: bad signature");
            return Ok(PutOutcome::RejectedSecurity);
        }

        let outcome = self.with_live_slot(&key.triple, |slot| {
            if let Some(owner) = slot.owner {
                if owner != request.public_key {
                    warn!(replica = %self.name, key = %key, "put rejected: not the owner");
                    return PutOutcome::RejectedSecurity;
                }
            }

            if let Some(new_owner) = request.record.rekey {
                slot.owner = Some(new_owner);
                debug!(replica = %self.name, triple = %key.triple, owner = %new_owner.short_id(), "protection key changed");
                return PutOutcome::Accepted;
            }

            if request.put_if_absent && slot.records.contains_key(&key.version) {
                return PutOutcome::RejectedNotAbsent;
            }

            let stored = slot.records.get(&key.version);
            let outcome = self
                .validator
                .validate(key, &request.record, &slot.chain, stored);
            if outcome.is_accepted() {
                slot.chain.insert(key.version, request.record.based_on);
                // Only the unversioned slot is ever overwritten in place.
                if key.version.is_zero() {
                    slot.records.insert(key.version, request.record.clone());
                } else {
                    slot.records
                        .entry(key.version)
                        .or_insert_with(|| request.record.clone());
                }
                slot.owner.get_or_insert(request.public_key);
                for evicted in self.pruner.prune(&mut slot.chain) {
                    slot.records.remove(&evicted);
                    debug!(replica = %self.name, triple = %key.triple, version = %evicted, "pruned revision");
                }
            }
            outcome
        })?;

        debug!(replica = %self.name, key = %key, %outcome, "put evaluated");
        if !outcome.is_accepted() {
            self.drop_if_vacant(&key.triple)?;
        }
        Ok(outcome)
    }

    fn get(
        &self,
        triple: &KeyTriple,
        version: Option<VersionKey>,
    ) -> StoreResult<Option<VersionedRecord>> {
        let Some(slot) = self.existing_slot(triple)? else {
            return Ok(None);
        };
        let slot = lock_slot(&slot)?;
        let now = now_ms();
        let record = match version {
            Some(v) => slot.records.get(&v).filter(|r| !r.is_expired(now)),
            // An expired head hides the record; superseded revisions are
            // never served in its place.
            None => slot
                .chain
                .head_key()
                .and_then(|v| slot.records.get(&v))
                .filter(|r| !r.is_expired(now)),
        };
        Ok(record.cloned())
    }

    fn digest(&self, triple: &KeyTriple) -> StoreResult<ChainDigest> {
        match self.existing_slot(triple)? {
            Some(slot) => Ok(lock_slot(&slot)?.chain.digest()),
            None => Ok(ChainDigest::new()),
        }
    }

    fn remove(&self, request: &RemoveRequest) -> StoreResult<RemoveOutcome> {
        if !request.verify_signature()? {
            warn!(replica = %self.name, triple = %request.triple, "remove rejected: bad signature");
            return Ok(RemoveOutcome::RejectedSecurity);
        }
        let Some(slot) = self.existing_slot(&request.triple)? else {
            return Ok(RemoveOutcome::NotFound);
        };

        let outcome = {
            let mut slot = lock_slot(&slot)?;
            if let Some(owner) = slot.owner {
                if owner != request.public_key {
                    warn!(replica = %self.name, triple = %request.triple, "remove rejected: not the owner");
                    return Ok(RemoveOutcome::RejectedSecurity);
                }
            }
            match request.version {
                Some(version) => {
                    let existed = slot.chain.remove(&version).is_some();
                    slot.records.remove(&version);
                    if slot.chain.is_empty() {
                        slot.owner = None;
                    }
                    if existed {
                        RemoveOutcome::Removed
                    } else {
                        RemoveOutcome::NotFound
                    }
                }
                None => {
                    let existed = !slot.chain.is_empty();
                    *slot = Slot::default();
                    if existed {
                        RemoveOutcome::Removed
                    } else {
                        RemoveOutcome::NotFound
                    }
                }
            }
        };

        self.drop_if_vacant(&request.triple)?;
        debug!(replica = %self.name, triple = %request.triple, ?outcome, "remove evaluated");
        Ok(outcome)
    }
}

impl std::fmt::Debug for InMemoryReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.slots.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InMemoryReplicaStore")
            .field("name", &self.name)
            .field("max_versions", &self.pruner.max_versions())
            .field("triple_count", &count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_crypto::ProtectionKeys;

    fn store() -> InMemoryReplicaStore {
        InMemoryReplicaStore::new("replica-0", &StorageConfig::default()).unwrap()
    }

    fn triple() -> KeyTriple {
        KeyTriple::from_names("alice", "profile", "main")
    }

    fn put(store: &InMemoryReplicaStore, record: &VersionedRecord, keys: &ProtectionKeys) -> PutOutcome {
        let request = PutRequest::signed(triple().at(record.version), record.clone(), false, keys).unwrap();
        store.put(&request).unwrap()
    }

    /// Write a linear history of `n` revisions and return them oldest first.
    fn write_history(store: &InMemoryReplicaStore, keys: &ProtectionKeys, n: u64) -> Vec<VersionedRecord> {
        let mut history = Vec::new();
        let mut parent = VersionKey::ZERO;
        for i in 1..=n {
            let record = VersionedRecord::successor(format!("rev-{i}"), i * 1_000, parent);
            assert_eq!(put(store, &record, keys), PutOutcome::Accepted);
            parent = record.version;
            history.push(record);
        }
        history
    }

    // -----------------------------------------------------------------------
    // Put / get
    // -----------------------------------------------------------------------

    #[test]
    fn put_then_get_head() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let history = write_history(&store, &keys, 3);

        let head = store.get(&triple(), None).unwrap().expect("head");
        assert_eq!(head, history[2]);
        let first = store.get(&triple(), Some(history[0].version)).unwrap();
        assert_eq!(first.as_ref(), Some(&history[0]));
    }

    #[test]
    fn get_missing_triple_is_none() {
        let store = store();
        assert!(store.get(&triple(), None).unwrap().is_none());
        assert!(store.digest(&triple()).unwrap().is_empty());
    }

    #[test]
    fn rejected_put_leaves_no_slot() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let orphan_key = triple().at(VersionKey::new(9, b"x"));
        let request = PutRequest::signed(orphan_key, VersionedRecord::root("r", 1), false, &keys).unwrap();
        assert_eq!(store.put(&request).unwrap(), PutOutcome::RejectedGeneric);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn put_if_absent_rejects_existing_revision() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let root = VersionedRecord::root("r", 1_000);
        assert_eq!(put(&store, &root, &keys), PutOutcome::Accepted);
        let again = PutRequest::signed(triple().at(root.version), root, true, &keys).unwrap();
        assert_eq!(store.put(&again).unwrap(), PutOutcome::RejectedNotAbsent);
    }

    #[test]
    fn unversioned_overwrite_keeps_single_entry() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let first = VersionedRecord::new("one", VersionKey::ZERO, VersionKey::ZERO);
        let second = VersionedRecord::new("two", VersionKey::ZERO, VersionKey::ZERO);
        assert_eq!(put(&store, &first, &keys), PutOutcome::Accepted);
        assert_eq!(put(&store, &second, &keys), PutOutcome::Accepted);
        assert_eq!(store.chain_len(&triple()).unwrap(), 1);
        let head = store.get(&triple(), None).unwrap().unwrap();
        assert_eq!(&head.payload[..], b"two");
    }

    #[test]
    fn stored_root_cannot_be_rewritten() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let root = VersionedRecord::root("original-root", 1_000);
        let next = VersionedRecord::successor("next", 2_000, root.version);
        assert_eq!(put(&store, &root, &keys), PutOutcome::Accepted);
        assert_eq!(put(&store, &next, &keys), PutOutcome::Accepted);

        let rewrite = VersionedRecord::new("rewritten-root", root.version, VersionKey::ZERO);
        assert_eq!(
            put(&store, &rewrite, &keys),
            PutOutcome::VersionConflictMissingBasedOn
        );
        let stored = store.get(&triple(), Some(root.version)).unwrap().unwrap();
        assert_eq!(&stored.payload[..], b"original-root");
    }

    #[test]
    fn stored_middle_revision_cannot_be_rewritten() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let history = write_history(&store, &keys, 3);

        let rewrite = VersionedRecord::new("changed", history[1].version, history[0].version);
        assert_eq!(put(&store, &rewrite, &keys), PutOutcome::VersionConflict);
        let stored = store.get(&triple(), Some(history[1].version)).unwrap().unwrap();
        assert_eq!(stored, history[1]);
    }

    #[test]
    fn identical_replay_keeps_the_original_record() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let history = write_history(&store, &keys, 2);

        let replay = history[1].clone().with_created_at(history[1].created_at_ms + 5_000);
        assert_eq!(put(&store, &replay, &keys), PutOutcome::Accepted);
        assert_eq!(store.chain_len(&triple()).unwrap(), 2);
        let stored = store.get(&triple(), None).unwrap().unwrap();
        assert_eq!(stored.created_at_ms, history[1].created_at_ms);
    }

    #[test]
    fn versioned_write_onto_unversioned_record_conflicts() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let unversioned = VersionedRecord::new("one", VersionKey::ZERO, VersionKey::ZERO);
        assert_eq!(put(&store, &unversioned, &keys), PutOutcome::Accepted);
        let versioned = VersionedRecord::root("two", 2_000);
        assert_eq!(
            put(&store, &versioned, &keys),
            PutOutcome::VersionConflictMissingVersionKey
        );
        assert_eq!(store.chain_len(&triple()).unwrap(), 1);
    }

    // -----------------------------------------------------------------------
    // Chain invariants
    // -----------------------------------------------------------------------

    #[test]
    fn second_root_is_rejected() {
        let store = store();
        let keys = ProtectionKeys::generate();
        write_history(&store, &keys, 1);
        let other_root = VersionedRecord::root("other", 50_000);
        assert_eq!(
            put(&store, &other_root, &keys),
            PutOutcome::VersionConflictMissingBasedOn
        );
        let digest = store.digest(&triple()).unwrap();
        assert_eq!(digest.iter().filter(|(_, b)| b.is_zero()).count(), 1);
    }

    #[test]
    fn history_is_pruned_to_bound() {
        let store = InMemoryReplicaStore::new("r", &StorageConfig { max_versions: 3 }).unwrap();
        let keys = ProtectionKeys::generate();
        let history = write_history(&store, &keys, 7);

        assert_eq!(store.chain_len(&triple()).unwrap(), 3);
        assert!(store.get(&triple(), Some(history[0].version)).unwrap().is_none());
        let head = store.get(&triple(), None).unwrap().unwrap();
        assert_eq!(head.version, history[6].version);
    }

    #[test]
    fn retained_entries_reference_retained_parents() {
        let store = InMemoryReplicaStore::new("r", &StorageConfig { max_versions: 4 }).unwrap();
        let keys = ProtectionKeys::generate();
        write_history(&store, &keys, 9);
        let digest = store.digest(&triple()).unwrap();
        // The oldest retained entry's parent may have been pruned.
        for (version, based_on) in digest.iter().skip(1) {
            assert!(digest.contains(based_on), "{version} has dangling parent");
        }
    }

    // -----------------------------------------------------------------------
    // Protection
    // -----------------------------------------------------------------------

    #[test]
    fn foreign_key_cannot_write() {
        let store = store();
        let owner = ProtectionKeys::generate();
        let intruder = ProtectionKeys::generate();
        let history = write_history(&store, &owner, 1);
        let next = VersionedRecord::successor("evil", 9_000, history[0].version);
        assert_eq!(put(&store, &next, &intruder), PutOutcome::RejectedSecurity);
    }

    #[test]
    fn forged_signature_is_rejected() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let record = VersionedRecord::root("r", 1_000);
        let mut request = PutRequest::signed(triple().at(record.version), record, false, &keys).unwrap();
        request.record.ttl_secs = 99;
        assert_eq!(store.put(&request).unwrap(), PutOutcome::RejectedSecurity);
    }

    #[test]
    fn protection_change_transfers_ownership() {
        let store = store();
        let old = ProtectionKeys::generate();
        let new = ProtectionKeys::generate();
        let history = write_history(&store, &old, 2);

        let change = PutRequest::change_protection(triple(), &old, new.public_key()).unwrap();
        assert_eq!(store.put(&change).unwrap(), PutOutcome::Accepted);
        assert_eq!(store.chain_len(&triple()).unwrap(), 2);

        let next = VersionedRecord::successor("n", 10_000, history[1].version);
        assert_eq!(put(&store, &next, &old), PutOutcome::RejectedSecurity);
        assert_eq!(put(&store, &next, &new), PutOutcome::Accepted);
    }

    // -----------------------------------------------------------------------
    // Remove
    // -----------------------------------------------------------------------

    #[test]
    fn remove_whole_triple() {
        let store = store();
        let keys = ProtectionKeys::generate();
        write_history(&store, &keys, 3);
        let request = RemoveRequest::signed(triple(), None, &keys).unwrap();
        assert_eq!(store.remove(&request).unwrap(), RemoveOutcome::Removed);
        assert!(store.get(&triple(), None).unwrap().is_none());
        assert!(store.is_empty().unwrap());
        assert_eq!(store.remove(&request).unwrap(), RemoveOutcome::NotFound);
    }

    #[test]
    fn remove_single_revision_exposes_previous_head() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let history = write_history(&store, &keys, 2);
        let request = RemoveRequest::signed(triple(), Some(history[1].version), &keys).unwrap();
        assert_eq!(store.remove(&request).unwrap(), RemoveOutcome::Removed);
        let head = store.get(&triple(), None).unwrap().unwrap();
        assert_eq!(head.version, history[0].version);
    }

    #[test]
    fn remove_requires_owner_key() {
        let store = store();
        let owner = ProtectionKeys::generate();
        let intruder = ProtectionKeys::generate();
        write_history(&store, &owner, 1);
        let request = RemoveRequest::signed(triple(), None, &intruder).unwrap();
        assert_eq!(store.remove(&request).unwrap(), RemoveOutcome::RejectedSecurity);
        assert!(store.get(&triple(), None).unwrap().is_some());
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    #[test]
    fn expired_records_are_hidden_and_swept() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let root = VersionedRecord::root("short-lived", 1_000)
            .with_created_at(1_000)
            .with_ttl(1);
        assert_eq!(put(&store, &root, &keys), PutOutcome::Accepted);

        assert!(store.get(&triple(), None).unwrap().is_none());
        assert_eq!(store.sweep_expired(now_ms()).unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn expired_head_is_not_replaced_by_an_older_revision() {
        let store = store();
        let keys = ProtectionKeys::generate();
        let root = VersionedRecord::root("long-lived", 1_000);
        let head = VersionedRecord::successor("short-lived", 2_000, root.version)
            .with_created_at(2_000)
            .with_ttl(1);
        assert_eq!(put(&store, &root, &keys), PutOutcome::Accepted);
        assert_eq!(put(&store, &head, &keys), PutOutcome::Accepted);

        assert!(store.get(&triple(), None).unwrap().is_none());
        assert!(store.get(&triple(), Some(root.version)).unwrap().is_some());
    }

    #[test]
    fn concurrent_writers_on_distinct_triples() {
        use std::thread;

        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let keys = ProtectionKeys::generate();
                    let triple = KeyTriple::from_names(&format!("user-{i}"), "profile", "main");
                    let record = VersionedRecord::root(format!("p{i}"), 1_000);
                    let request =
                        PutRequest::signed(triple.at(record.version), record, false, &keys).unwrap();
                    assert_eq!(store.put(&request).unwrap(), PutOutcome::Accepted);
                })
            })
            .collect();
        for h in handles {
            h.join().expect("thread should not panic");
        }
        assert_eq!(store.len().unwrap(), 8);
    }
}
