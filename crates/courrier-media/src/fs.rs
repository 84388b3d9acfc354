//! Filesystem [`ChunkSink`] implementation.
//!
//! Chunks accumulate in a per-session staging file; `commit` promotes the
//! staging file to a content-addressed final path in one rename, so a
//! reader never observes a partially written object.  `abort` (and any
//! failed commit) removes the staging file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MediaError, Result};
use crate::sink::{ChunkSink, SinkSession};

struct OpenTransfer {
    staging_path: PathBuf,
    content_hash: String,
    expected_size: u64,
    received: u64,
    next_index: u32,
}

/// Stores blobs under `<base>/<content-hash>` with staging in
/// `<base>/staging/<session-id>`.
pub struct FsChunkSink {
    base_path: PathBuf,
    transfers: Mutex<HashMap<Uuid, OpenTransfer>>,
}

impl FsChunkSink {
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(base_path.join("staging"))
            .await
            .map_err(|e| {
                MediaError::UploadFailed(format!(
                    "Failed to create blob directory '{}': {}",
                    base_path.display(),
                    e
                ))
            })?;

        info!(path = %base_path.display(), "blob sink initialized");

        Ok(Self {
            base_path,
            transfers: Mutex::new(HashMap::new()),
        })
    }

    /// Final on-disk location of a committed blob.
    pub fn path_for(&self, content_hash: &str) -> PathBuf {
        self.base_path.join(content_hash)
    }

    fn take_transfer(&self, session: &SinkSession) -> Option<OpenTransfer> {
        self.transfers
            .lock()
            .expect("transfers lock poisoned")
            .remove(&session.0)
    }
}

/// A content hash doubles as a file name; only a lowercase 32-byte BLAKE3
/// hex string is accepted, which also rules out traversal.
fn validate_hash(content_hash: &str) -> Result<()> {
    let decoded = hex::decode(content_hash)
        .map_err(|_| MediaError::UploadFailed(format!("Invalid content hash '{content_hash}'")))?;
    if decoded.len() != 32 || content_hash.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(MediaError::UploadFailed(format!(
            "Invalid content hash '{content_hash}'"
        )));
    }
    Ok(())
}

#[async_trait]
impl ChunkSink for FsChunkSink {
    async fn begin(
        &self,
        content_hash: &str,
        byte_size: u64,
        mime_type: &str,
    ) -> Result<SinkSession> {
        validate_hash(content_hash)?;

        let session = SinkSession::new();
        let staging_path = self.base_path.join("staging").join(session.0.to_string());

        fs::write(&staging_path, b"")
            .await
            .map_err(|e| MediaError::UploadFailed(format!("Failed to open staging file: {e}")))?;

        self.transfers
            .lock()
            .expect("transfers lock poisoned")
            .insert(
                session.0,
                OpenTransfer {
                    staging_path,
                    content_hash: content_hash.to_string(),
                    expected_size: byte_size,
                    received: 0,
                    next_index: 0,
                },
            );

        debug!(session = %session, hash = %content_hash, size = byte_size, mime = mime_type, "transfer opened");
        Ok(session)
    }

    async fn put_chunk(&self, session: &SinkSession, index: u32, chunk: &[u8]) -> Result<()> {
        let staging_path = {
            let transfers = self.transfers.lock().expect("transfers lock poisoned");
            let transfer = transfers
                .get(&session.0)
                .ok_or_else(|| MediaError::UploadFailed(format!("Unknown session {session}")))?;
            if index != transfer.next_index {
                return Err(MediaError::UploadFailed(format!(
                    "Chunk {index} out of order (expected {})",
                    transfer.next_index
                )));
            }
            transfer.staging_path.clone()
        };

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&staging_path)
            .await
            .map_err(|e| MediaError::UploadFailed(format!("Failed to open staging file: {e}")))?;
        file.write_all(chunk)
            .await
            .map_err(|e| MediaError::UploadFailed(format!("Failed to write chunk {index}: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MediaError::UploadFailed(format!("Failed to flush chunk {index}: {e}")))?;

        let mut transfers = self.transfers.lock().expect("transfers lock poisoned");
        if let Some(transfer) = transfers.get_mut(&session.0) {
            transfer.received += chunk.len() as u64;
            transfer.next_index += 1;
        }
        Ok(())
    }

    async fn commit(&self, session: &SinkSession) -> Result<String> {
        let transfer = self
            .take_transfer(session)
            .ok_or_else(|| MediaError::UploadFailed(format!("Unknown session {session}")))?;

        if transfer.received != transfer.expected_size {
            let _ = fs::remove_file(&transfer.staging_path).await;
            return Err(MediaError::UploadFailed(format!(
                "Size mismatch: received {} of {} bytes",
                transfer.received, transfer.expected_size
            )));
        }

        let final_path = self.path_for(&transfer.content_hash);
        fs::rename(&transfer.staging_path, &final_path)
            .await
            .map_err(|e| {
                MediaError::UploadFailed(format!("Failed to promote staging file: {e}"))
            })?;

        info!(
            hash = %transfer.content_hash,
            size = transfer.received,
            "blob committed"
        );
        Ok(format!("blob://{}", transfer.content_hash))
    }

    async fn abort(&self, session: &SinkSession) -> Result<()> {
        if let Some(transfer) = self.take_transfer(session) {
            if let Err(e) = fs::remove_file(&transfer.staging_path).await {
                warn!(session = %session, error = %e, "failed to remove staging file");
            }
            debug!(session = %session, "transfer aborted");
        }
        Ok(())
    }
}
