use thiserror::Error;

/// Failures parsing a key or version from its text form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("malformed hex key: {0}")]
    InvalidHex(String),

    #[error("key must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
