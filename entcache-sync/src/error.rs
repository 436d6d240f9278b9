//! Error types for the sync layer.

use entcache_model::{ActionError, DataServiceError};
use entcache_types::CorrelationId;
use thiserror::Error;

/// Result type for dispatcher and engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced to callers awaiting a dispatched operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store dropped its action feed before the operation completed.
    #[error("channel closed")]
    ChannelClosed,

    /// The data service reported a failure.
    #[error("request failed: {0}")]
    Request(#[from] DataServiceError),

    /// The operation was canceled before it completed.
    #[error("operation {correlation_id} canceled")]
    Canceled {
        correlation_id: CorrelationId,
        reason: Option<String>,
    },

    /// No completion arrived within the caller's wait limit.
    #[error("operation timed out")]
    Timeout,

    /// The action could not be built.
    #[error("invalid action: {0}")]
    Action(#[from] ActionError),

    /// The completion carried data of an unexpected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
