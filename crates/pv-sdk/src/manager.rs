use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pv_crypto::{ContentHash, ProtectionKeys, PublicKey};
use pv_store::VersionedRecord;
use pv_sync::{PutCoordinator, PutVerdict};
use pv_types::{KeyTriple, VersionKey, VersionedKey};

use crate::error::SdkResult;

/// Verdict of a put plus the hash of the stored payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedPut {
    pub verdict: PutVerdict,
    pub content_hash: ContentHash,
}

/// Boundary API for versioned records.
///
/// Every operation goes through the injected [`PutCoordinator`]; the
/// manager only assembles records and requests.
pub struct DataManager {
    coordinator: Arc<PutCoordinator>,
}

impl DataManager {
    pub fn new(coordinator: Arc<PutCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<PutCoordinator> {
        &self.coordinator
    }

    /// Store `payload` as revision `key.version`, built on `based_on`.
    ///
    /// A zero `key.version` writes an unversioned record; a zero
    /// `based_on` writes a root. A `ttl_secs` of zero never expires.
    pub async fn put(
        &self,
        key: VersionedKey,
        payload: impl Into<Bytes>,
        based_on: VersionKey,
        keys: &ProtectionKeys,
        ttl_secs: u64,
    ) -> SdkResult<PutVerdict> {
        let record = VersionedRecord::new(payload, key.version, based_on).with_ttl(ttl_secs);
        debug!(key = %key, based_on = %based_on, ttl_secs, "put");
        Ok(self.coordinator.put(key, record, keys).await?)
    }

    /// Like [`put`](Self::put), and also returns the payload's content hash
    /// for use in an external signing step.
    pub async fn put_hashed(
        &self,
        key: VersionedKey,
        payload: impl Into<Bytes>,
        based_on: VersionKey,
        keys: &ProtectionKeys,
        ttl_secs: u64,
    ) -> SdkResult<HashedPut> {
        let record = VersionedRecord::new(payload, key.version, based_on).with_ttl(ttl_secs);
        let content_hash = record.content_hash();
        let verdict = self.coordinator.put(key, record, keys).await?;
        Ok(HashedPut {
            verdict,
            content_hash,
        })
    }

    /// Store `record` exactly as given, keeping its timestamps.
    pub async fn put_record(
        &self,
        triple: KeyTriple,
        record: VersionedRecord,
        keys: &ProtectionKeys,
    ) -> SdkResult<PutVerdict> {
        Ok(self.coordinator.put(triple.at(record.version), record, keys).await?)
    }

    /// The head revision, or a specific one.
    pub async fn get(
        &self,
        triple: &KeyTriple,
        version: Option<VersionKey>,
    ) -> SdkResult<Option<VersionedRecord>> {
        Ok(self.coordinator.get(triple, version).await?)
    }

    /// Remove one revision, or every revision of the triple.
    pub async fn remove(
        &self,
        triple: KeyTriple,
        version: Option<VersionKey>,
        keys: &ProtectionKeys,
    ) -> SdkResult<bool> {
        Ok(self.coordinator.remove(triple, version, keys).await?)
    }

    pub async fn change_protection(
        &self,
        triple: KeyTriple,
        current: &ProtectionKeys,
        new_owner: PublicKey,
    ) -> SdkResult<PutVerdict> {
        Ok(self
            .coordinator
            .change_protection(triple, current, new_owner)
            .await?)
    }
}

impl std::fmt::Debug for DataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataManager")
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use proptest::prelude::*;
    use pv_crypto::ContentHasher;
    use pv_store::{now_ms, PutOutcome, ReplicaStore};
    use pv_sync::{CoordinatorConfig, RetryPolicy, SyncError};

    use crate::error::SdkError;
    use crate::network::LocalNetwork;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            verify: true,
            verify_attempts: 2,
            settle_delay: Duration::from_millis(1),
            replica_timeout: Duration::from_millis(500),
            deadline: None,
            retry: RetryPolicy::fixed(1, Duration::from_millis(1)),
        }
    }

    fn setup() -> (LocalNetwork, DataManager) {
        let network = LocalNetwork::new(3, &Default::default()).unwrap();
        let coordinator = network.coordinator(config()).unwrap();
        (network, DataManager::new(Arc::new(coordinator)))
    }

    fn triple() -> KeyTriple {
        KeyTriple::from_names("alice", "profile", "main")
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_network, manager) = setup();
        let keys = ProtectionKeys::generate();
        let version = VersionKey::new(1_000, b"v1");

        let verdict = manager
            .put(triple().at(version), "payload", VersionKey::ZERO, &keys, 0)
            .await
            .unwrap();
        assert!(verdict.is_accepted());

        let record = manager.get(&triple(), None).await.unwrap().unwrap();
        assert_eq!(&record.payload[..], b"payload");
        assert_eq!(record.version, version);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn any_payload_round_trips(
            payload in proptest::collection::vec(any::<u8>(), 0..256),
            name in "[a-z]{1,12}",
            ts in 1u64..1_000_000_000,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (record, version) = runtime.block_on(async {
                let (_network, manager) = setup();
                let keys = ProtectionKeys::generate();
                let triple = KeyTriple::from_names(&name, "blob", "data");
                let version = VersionKey::new(ts, &payload);
                manager
                    .put(triple.at(version), payload.clone(), VersionKey::ZERO, &keys, 0)
                    .await
                    .unwrap()
                    .into_result()
                    .unwrap();
                (manager.get(&triple, None).await.unwrap(), version)
            });
            let record = record.unwrap();
            prop_assert_eq!(&record.payload[..], &payload[..]);
            prop_assert_eq!(record.version, version);
        }
    }

    #[tokio::test]
    async fn hashed_put_returns_payload_hash() {
        let (_network, manager) = setup();
        let keys = ProtectionKeys::generate();
        let version = VersionKey::new(1_000, b"doc");
        let put = manager
            .put_hashed(triple().at(version), "signed document", VersionKey::ZERO, &keys, 0)
            .await
            .unwrap();
        assert!(put.verdict.is_accepted());
        assert_eq!(put.content_hash, ContentHasher::PAYLOAD.hash(b"signed document"));
    }

    #[tokio::test]
    async fn unversioned_record_can_be_overwritten_but_not_versioned() {
        let (network, manager) = setup();
        let keys = ProtectionKeys::generate();
        let flat = triple().at(VersionKey::ZERO);

        assert!(manager
            .put(flat, "first", VersionKey::ZERO, &keys, 0)
            .await
            .unwrap()
            .is_accepted());
        assert!(manager
            .put(flat, "second", VersionKey::ZERO, &keys, 0)
            .await
            .unwrap()
            .is_accepted());
        let head = manager.get(&triple(), None).await.unwrap().unwrap();
        assert_eq!(&head.payload[..], b"second");

        let versioned = triple().at(VersionKey::new(5_000, b"third"));
        let result = manager
            .put(versioned, "third", VersionKey::ZERO, &keys, 0)
            .await;
        assert!(matches!(
            result,
            Err(SdkError::Sync(SyncError::MalformedVersion(
                PutOutcome::VersionConflictMissingVersionKey
            )))
        ));
        for store in network.stores() {
            assert_eq!(store.chain_len(&triple()).unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn remove_without_version_clears_the_chain() {
        let (_network, manager) = setup();
        let keys = ProtectionKeys::generate();
        let v1 = VersionKey::new(1_000, b"v1");
        let v2 = VersionKey::new(2_000, b"v2");
        manager.put(triple().at(v1), "v1", VersionKey::ZERO, &keys, 0).await.unwrap();
        manager.put(triple().at(v2), "v2", v1, &keys, 0).await.unwrap();

        assert!(manager.remove(triple(), None, &keys).await.unwrap());
        assert!(manager.get(&triple(), None).await.unwrap().is_none());
        assert!(manager.get(&triple(), Some(v1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_records_disappear() {
        let (network, manager) = setup();
        let keys = ProtectionKeys::generate();
        let version = VersionKey::new(1_000, b"tmp");
        manager
            .put(triple().at(version), "temporary", VersionKey::ZERO, &keys, 60)
            .await
            .unwrap();
        assert!(manager.get(&triple(), None).await.unwrap().is_some());

        let removed = network.sweep_expired(now_ms() + 61_000).unwrap();
        assert_eq!(removed, 3);
        assert!(manager.get(&triple(), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn protection_change_hands_over_writes() {
        let (_network, manager) = setup();
        let old = ProtectionKeys::generate();
        let new = ProtectionKeys::generate();
        let v1 = VersionKey::new(1_000, b"v1");
        manager.put(triple().at(v1), "v1", VersionKey::ZERO, &old, 0).await.unwrap();

        assert!(manager
            .change_protection(triple(), &old, new.public_key())
            .await
            .unwrap()
            .is_accepted());
        let v2 = VersionKey::new(2_000, b"v2");
        assert!(manager
            .put(triple().at(v2), "v2", v1, &new, 0)
            .await
            .unwrap()
            .is_accepted());
        assert!(matches!(
            manager.remove(triple(), None, &old).await,
            Err(SdkError::Sync(SyncError::Unauthorized(_)))
        ));
    }
}
