use thiserror::Error;

/// Errors produced by the media layer.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The transfer failed.  Retryable: re-invoke with the same bytes; the
    /// aborted attempt leaves nothing behind.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// The upload was cancelled before completion.
    #[error("Upload cancelled")]
    Cancelled,

    /// The attachment exceeds the configured size cap.
    #[error("Attachment too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// Zero-byte attachments are rejected outright.
    #[error("Empty attachment")]
    Empty,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MediaError>;
