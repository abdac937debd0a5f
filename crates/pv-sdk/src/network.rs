use std::sync::Arc;

use tracing::info;

use pv_store::{InMemoryReplicaStore, ReplicaStore, StorageConfig};
use pv_sync::{CoordinatorConfig, LocalReplica, PutCoordinator, ReplicaRouter, ReplicaTransport, StaticRouter};

use crate::config::PeerVaultConfig;
use crate::error::{SdkError, SdkResult};

/// A set of in-process replicas sharing one router.
///
/// Used by tests, simulations and the CLI in place of a real DHT.
pub struct LocalNetwork {
    stores: Vec<Arc<InMemoryReplicaStore>>,
    router: Arc<StaticRouter>,
}

impl LocalNetwork {
    pub fn new(replicas: usize, storage: &StorageConfig) -> SdkResult<Self> {
        if replicas == 0 {
            return Err(SdkError::InvalidOperation(
                "a network needs at least one replica".into(),
            ));
        }
        let stores = (0..replicas)
            .map(|i| InMemoryReplicaStore::new(format!("replica-{i}"), storage).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        let transports = stores
            .iter()
            .map(|store| {
                let backend: Arc<dyn ReplicaStore> = Arc::clone(store) as Arc<dyn ReplicaStore>;
                Arc::new(LocalReplica::new(store.name(), backend)) as Arc<dyn ReplicaTransport>
            })
            .collect();
        info!(replicas, max_versions = storage.max_versions, "local network started");
        Ok(Self {
            stores,
            router: Arc::new(StaticRouter::new(transports)),
        })
    }

    pub fn from_config(config: &PeerVaultConfig) -> SdkResult<Self> {
        Self::new(config.replicas, &config.storage)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn stores(&self) -> &[Arc<InMemoryReplicaStore>] {
        &self.stores
    }

    pub fn router(&self) -> Arc<dyn ReplicaRouter> {
        Arc::clone(&self.router) as Arc<dyn ReplicaRouter>
    }

    /// A coordinator bound to this network.
    pub fn coordinator(&self, config: CoordinatorConfig) -> SdkResult<PutCoordinator> {
        Ok(PutCoordinator::new(self.router(), config)?)
    }

    /// Expire records on every replica. Returns the total removed.
    pub fn sweep_expired(&self, now_ms: u64) -> SdkResult<usize> {
        let mut removed = 0;
        for store in &self.stores {
            removed += store.sweep_expired(now_ms)?;
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("replicas", &self.stores.len())
            .finish()
    }
}
