use thiserror::Error;

/// Errors produced by the sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Subscription or pagination could not reach the remote store.
    /// Transient; callers retry with backoff.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A read-receipt batch raced another writer. Always safe to retry
    /// because the batch is an additive-only set union.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// The stream handle was closed.
    #[error("Stream closed")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
