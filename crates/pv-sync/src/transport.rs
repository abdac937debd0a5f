use std::sync::Arc;

use async_trait::async_trait;

use pv_store::{ChainDigest, PutOutcome, RemoveOutcome, ReplicaStore, RemoveRequest, PutRequest, VersionedRecord};
use pv_types::{KeyTriple, VersionKey};

use crate::error::SyncResult;

/// Connection to one replica peer.
///
/// The coordinator treats every method as a network round trip that may
/// fail or hang; it applies its own per-call timeout around each one.
#[async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Stable identifier of the remote peer, used in logs.
    fn peer(&self) -> &str;

    async fn put(&self, request: &PutRequest) -> SyncResult<PutOutcome>;

    async fn get(
        &self,
        triple: &KeyTriple,
        version: Option<VersionKey>,
    ) -> SyncResult<Option<VersionedRecord>>;

    async fn digest(&self, triple: &KeyTriple) -> SyncResult<ChainDigest>;

    async fn remove(&self, request: &RemoveRequest) -> SyncResult<RemoveOutcome>;
}

/// In-process transport that calls a [`ReplicaStore`] directly.
pub struct LocalReplica {
    peer: String,
    store: Arc<dyn ReplicaStore>,
}

impl LocalReplica {
    pub fn new(peer: impl Into<String>, store: Arc<dyn ReplicaStore>) -> Self {
        Self {
            peer: peer.into(),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReplicaStore> {
        &self.store
    }
}

#[async_trait]
impl ReplicaTransport for LocalReplica {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn put(&self, request: &PutRequest) -> SyncResult<PutOutcome> {
        Ok(self.store.put(request)?)
    }

    async fn get(
        &self,
        triple: &KeyTriple,
        version: Option<VersionKey>,
    ) -> SyncResult<Option<VersionedRecord>> {
        Ok(self.store.get(triple, version)?)
    }

    async fn digest(&self, triple: &KeyTriple) -> SyncResult<ChainDigest> {
        Ok(self.store.digest(triple)?)
    }

    async fn remove(&self, request: &RemoveRequest) -> SyncResult<RemoveOutcome> {
        Ok(self.store.remove(request)?)
    }
}

impl std::fmt::Debug for LocalReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplica").field("peer", &self.peer).finish()
    }
}
