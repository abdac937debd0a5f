/// Errors from replica store operations.
///
/// Validation verdicts are not errors: they are reported as
/// [`crate::PutOutcome`] / [`crate::RemoveOutcome`]. A `StoreError` means the
/// replica could not evaluate the request at all.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Serialization of a signing message failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A slot lock was poisoned by a panicking writer.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// The store configuration is unusable.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
