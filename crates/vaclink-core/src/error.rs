//! Error types for vaclink

use thiserror::Error;

/// Core vaclink errors
#[derive(Error, Debug)]
pub enum VaclinkError {
    // Wire errors
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("unsupported protocol epoch: {0}")]
    UnsupportedEpoch(String),

    #[error("incomplete response: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },

    #[error("device declared a zero-length secret (not in pairing mode)")]
    ZeroLength,

    // Transport errors
    #[error("operation timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    // Session errors
    #[error("connection is closed")]
    Closed,
}

impl VaclinkError {
    /// True when more bytes may still complete the parse.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, VaclinkError::Incomplete { .. })
    }
}

/// Result type for vaclink operations
pub type VaclinkResult<T> = Result<T, VaclinkError>;
