use thiserror::Error;

use tgnet_core::{ChannelId, CoreError};

/// Failures reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Temporary condition (lock timeout, serialization failure, dropped
    /// connection). Safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store failure: {0}")]
    Backend(String),

    /// A row could not be turned back into a domain value.
    #[error("stored data is invalid: {0}")]
    Corrupt(String),
}

impl StoreError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("channel {0} not found")]
    NotFound(ChannelId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("analysis of channel {0} was cancelled")]
    Cancelled(ChannelId),

    #[error("analysis of channel {channel_id} exceeded {seconds}s")]
    TimedOut { channel_id: ChannelId, seconds: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("computation failed: {0}")]
    Compute(String),
}

impl EngineError {
    /// Store and compute failures; callers report these as internal errors.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, EngineError::Store(_) | EngineError::Compute(_))
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownAnalysisType(_) | CoreError::UnknownConnectionType(_) => {
                EngineError::InvalidArgument(err.to_string())
            }
            other => EngineError::Compute(other.to_string()),
        }
    }
}
