use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("sync error: {0}")]
    Sync(#[from] pv_sync::SyncError),

    #[error("store error: {0}")]
    Store(#[from] pv_store::StoreError),

    #[error("config error: {0}")]
    Config(String),

    #[error("step {step} failed: {source}")]
    StepFailed {
        step: String,
        source: Box<SdkError>,
        /// Steps whose compensation ran, in the order it ran.
        rolled_back: Vec<String>,
    },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SdkError {
    /// Returns `true` if this error, or the step failure wrapping it, is a
    /// lost version race the caller should retry on a fresh base.
    pub fn is_version_fork(&self) -> bool {
        match self {
            Self::Sync(pv_sync::SyncError::VersionForkAfterPut { .. }) => true,
            Self::StepFailed { source, .. } => source.is_version_fork(),
            _ => false,
        }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
