//! The blob-store boundary for resumable chunked transfer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Handle to one in-progress chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkSession(pub Uuid);

impl SinkSession {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SinkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contract of the durable blob store.
///
/// A transfer is `begin` → `put_chunk`* → `commit`; any other exit goes
/// through `abort`, which must leave no partial object referenced.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Open a transfer for an object with the given BLAKE3 hash (hex),
    /// total size, and MIME type.
    async fn begin(&self, content_hash: &str, byte_size: u64, mime_type: &str)
        -> Result<SinkSession>;

    /// Append one chunk.  Chunks arrive in order, `index` starting at 0.
    async fn put_chunk(&self, session: &SinkSession, index: u32, chunk: &[u8]) -> Result<()>;

    /// Promote the completed transfer to its durable, content-addressed
    /// location and return the stable URL.
    async fn commit(&self, session: &SinkSession) -> Result<String>;

    /// Discard the transfer.  Idempotent; unknown sessions are a no-op.
    async fn abort(&self, session: &SinkSession) -> Result<()>;
}
