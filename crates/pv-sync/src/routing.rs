use std::sync::Arc;

use pv_types::KeyTriple;

use crate::transport::ReplicaTransport;

/// Supplies the replicas currently responsible for a key.
///
/// In a DHT this is the key-to-peer assignment; the coordinator asks again
/// on every attempt so membership changes are picked up between retries.
pub trait ReplicaRouter: Send + Sync {
    fn replicas_for(&self, triple: &KeyTriple) -> Vec<Arc<dyn ReplicaTransport>>;
}

/// A fixed replica set responsible for every key.
#[derive(Clone, Default)]
pub struct StaticRouter {
    replicas: Vec<Arc<dyn ReplicaTransport>>,
}

impl StaticRouter {
    pub fn new(replicas: Vec<Arc<dyn ReplicaTransport>>) -> Self {
        Self { replicas }
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn peers(&self) -> impl Iterator<Item = &str> {
        self.replicas.iter().map(|r| r.peer())
    }
}

impl ReplicaRouter for StaticRouter {
    fn replicas_for(&self, _triple: &KeyTriple) -> Vec<Arc<dyn ReplicaTransport>> {
        self.replicas.clone()
    }
}

impl std::fmt::Debug for StaticRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.peers()).finish()
    }
}
