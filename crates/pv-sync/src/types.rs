use serde::{Deserialize, Serialize};

use pv_types::{VersionKey, VersionedKey};

use crate::error::{SyncError, SyncResult};

/// Result of a coordinated put.
///
/// A lost race is an expected outcome of optimistic concurrency and is
/// returned as [`PutVerdict::Conflict`], not as an error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutVerdict {
    Accepted(PutReceipt),
    /// Another writer's sibling revision is canonical. Re-fetch the head,
    /// reapply the change on top of it, and put again.
    Conflict(ForkInfo),
    /// Retries or the deadline were exhausted.
    Failed { reason: String, attempts: u32 },
}

impl PutVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Map conflicts and failures onto [`SyncError`] for `?`-style callers.
    pub fn into_result(self) -> SyncResult<PutReceipt> {
        match self {
            Self::Accepted(receipt) => Ok(receipt),
            Self::Conflict(fork) => Err(SyncError::VersionForkAfterPut {
                key: fork.key.to_string(),
            }),
            Self::Failed { reason, attempts } => Err(SyncError::PutFailed { reason, attempts }),
        }
    }
}

/// Acknowledgement of a durable put.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutReceipt {
    pub key: VersionedKey,
    /// Replicas that accepted the write on the final attempt.
    pub accepted_by: usize,
    pub contacted: usize,
    /// Attempts used, including the successful one.
    pub attempts: u32,
    /// Whether a follow-up read observed the revision at a majority.
    pub verified: bool,
}

/// Details of a lost race.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkInfo {
    pub key: VersionedKey,
    pub based_on: VersionKey,
    /// The sibling revision that was observed, if any.
    pub rival: Option<VersionKey>,
    pub lose_votes: usize,
    pub voters: usize,
}
