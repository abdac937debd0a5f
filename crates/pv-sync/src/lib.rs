//! Client-side replication for PeerVault.
//!
//! A write is sent to every replica responsible for its key. Each replica
//! validates it against its own chain only, so verdicts can disagree; the
//! [`PutCoordinator`] reconciles them by majority, re-verification and
//! bounded retry, and hands real races to the [`ForkDetector`].
//!
//! Replicas are reached through the [`ReplicaTransport`] trait and selected
//! by a [`ReplicaRouter`]; both are injected, so the same coordinator runs
//! against in-process stores in tests and remote peers in a deployment.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod fork;
pub mod policy;
pub mod routing;
pub mod transport;
pub mod types;

pub use config::CoordinatorConfig;
pub use coordinator::PutCoordinator;
pub use error::{SyncError, SyncResult};
pub use fork::{ForkDecision, ForkDetector, ForkResolution, ForkVote};
pub use policy::RetryPolicy;
pub use routing::{ReplicaRouter, StaticRouter};
pub use transport::{LocalReplica, ReplicaTransport};
pub use types::{ForkInfo, PutReceipt, PutVerdict};
