//! Replica-side versioned storage for PeerVault.
//!
//! Each peer responsible for a key keeps, per (location, domain, content)
//! triple, a bounded chain of revisions. This crate holds that chain, the
//! validator that decides whether a write may extend it, and the pruner
//! that keeps it bounded.
//!
//! # Components
//!
//! - [`VersionedRecord`] -- one immutable revision with its parent pointer
//! - [`VersionChain`] / [`ChainDigest`] -- replica-local history and its
//!   payload-free view
//! - [`StorageValidator`] -- accept/reject a write from the local chain only
//! - [`VersionPruner`] -- evict the oldest revisions after every accepted write
//! - [`ReplicaStore`] -- the storage interface a replica peer exposes
//! - [`InMemoryReplicaStore`] -- `HashMap`-based backend with per-triple locks
//!
//! # Design Rules
//!
//! 1. Revisions are immutable once written.
//! 2. The validator never contacts other replicas.
//! 3. A chain has at most one root and only grows at its head.
//! 4. The head of a chain is never pruned.
//! 5. Writes and removals must be signed by the triple's owner key.

pub mod chain;
pub mod config;
pub mod error;
pub mod memory;
pub mod outcome;
pub mod pruner;
pub mod record;
pub mod traits;
pub mod validator;

pub use chain::{ChainDigest, VersionChain};
pub use config::StorageConfig;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryReplicaStore;
pub use outcome::{PutOutcome, RemoveOutcome};
pub use pruner::VersionPruner;
pub use record::{now_ms, PutRequest, RemoveRequest, VersionedRecord};
pub use traits::ReplicaStore;
pub use validator::StorageValidator;
