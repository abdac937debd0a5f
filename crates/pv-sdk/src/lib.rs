//! High-level SDK for PeerVault.
//!
//! [`DataManager`] is the boundary API: versioned put/get/remove on
//! (location, domain, content) triples, backed by an injected
//! [`PutCoordinator`](pv_sync::PutCoordinator). Multi-step workflows compose
//! [`Step`]s into a [`Pipeline`] that compensates completed steps when a
//! later one fails.

pub mod config;
pub mod error;
pub mod manager;
pub mod network;
pub mod pipeline;

pub use config::PeerVaultConfig;
pub use error::{SdkError, SdkResult};
pub use manager::{DataManager, HashedPut};
pub use network::LocalNetwork;
pub use pipeline::{Pipeline, PipelineReport, PutStep, RemoveStep, Step, StepContext};

// Re-export key types
pub use pv_crypto::{ContentHash, ProtectionKeys, PublicKey};
pub use pv_store::{StorageConfig, VersionedRecord};
pub use pv_sync::{CoordinatorConfig, PutCoordinator, PutReceipt, PutVerdict, RetryPolicy, SyncError};
pub use pv_types::{KeyHash, KeyTriple, VersionKey, VersionedKey};
