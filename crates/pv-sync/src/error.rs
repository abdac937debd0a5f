use thiserror::Error;

use pv_store::{PutOutcome, StoreError};

#[derive(Debug, Error)]
pub enum SyncError {
    /// The fork detector decided another writer's revision is canonical.
    #[error("version fork after put on {key}: another writer won the race")]
    VersionForkAfterPut { key: String },

    #[error("put failed after {attempts} attempt(s): {reason}")]
    PutFailed { reason: String, attempts: u32 },

    #[error("remove failed after {attempts} attempt(s): {reason}")]
    RemoveFailed { reason: String, attempts: u32 },

    #[error("unauthorized: protection key rejected for {0}")]
    Unauthorized(String),

    #[error("malformed version reference: {0}")]
    MalformedVersion(PutOutcome),

    #[error("replica {peer} unreachable: {reason}")]
    Transport { peer: String, reason: String },

    #[error("replica {peer} timed out")]
    Timeout { peer: String },

    #[error("no replica answered for {0}")]
    Unreachable(String),

    #[error("invalid coordinator config: {0}")]
    InvalidConfig(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type SyncResult<T> = Result<T, SyncError>;
