use thiserror::Error;

/// Errors produced by the notification layer.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The user denied notification permission.  Recorded, non-fatal; no
    /// retry until the user opts in again.
    #[error("Notification permission denied")]
    PermissionDenied,

    /// The push gateway could not be reached.  Transient; retried with
    /// backoff.
    #[error("Push gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The platform refused a local presentation at call time.  Non-fatal.
    #[error("Local presentation failed: {0}")]
    Presentation(String),

    /// Persisting the registration failed.
    #[error("Store error: {0}")]
    Store(#[from] courrier_store::StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NotifyError>;
