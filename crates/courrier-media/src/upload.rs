//! The attachment upload pipeline.
//!
//! Hashes the bytes up front, streams fixed-size chunks to the sink with
//! fractional progress, and only ever hands back a [`MediaAttachment`]
//! once the sink committed — the caller cannot build a message around an
//! attachment that does not durably exist.  Any failure or cancellation
//! aborts the sink session so nothing partial stays referenced.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use courrier_shared::constants::{MAX_ATTACHMENT_SIZE, UPLOAD_CHUNK_SIZE};
use courrier_shared::MediaAttachment;

use crate::error::{MediaError, Result};
use crate::sink::ChunkSink;

/// Configuration for the upload pipeline.
#[derive(Debug, Clone, Copy)]
pub struct UploadConfig {
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Largest accepted attachment.
    pub max_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: UPLOAD_CHUNK_SIZE,
            max_size: MAX_ATTACHMENT_SIZE,
        }
    }
}

/// Uploads attachment bytes and produces stable references.
#[derive(Clone)]
pub struct MediaUploadPipeline {
    sink: Arc<dyn ChunkSink>,
    config: UploadConfig,
}

impl MediaUploadPipeline {
    pub fn new(sink: Arc<dyn ChunkSink>) -> Self {
        Self::with_config(sink, UploadConfig::default())
    }

    pub fn with_config(sink: Arc<dyn ChunkSink>, config: UploadConfig) -> Self {
        Self { sink, config }
    }

    /// Upload `bytes` and return the attachment reference.
    ///
    /// [`MediaError::UploadFailed`] is retryable: re-invoke with the same
    /// bytes; the failed attempt was aborted cleanly.
    pub async fn upload(&self, bytes: Bytes, mime_type: &str) -> Result<MediaAttachment> {
        self.run(bytes, mime_type, None, None).await
    }

    /// Spawn the upload as a task, with observable progress and
    /// cancellation.  Dropping the returned [`UploadTask`] also cancels.
    pub fn start(&self, bytes: Bytes, mime_type: &str) -> UploadTask {
        let (progress_tx, progress_rx) = watch::channel(0.0f32);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let pipeline = self.clone();
        let mime_type = mime_type.to_string();
        let handle = tokio::spawn(async move {
            pipeline
                .run(bytes, &mime_type, Some(progress_tx), Some(cancel_rx))
                .await
        });

        UploadTask {
            progress: progress_rx,
            cancel: Some(cancel_tx),
            handle,
        }
    }

    async fn run(
        &self,
        bytes: Bytes,
        mime_type: &str,
        progress: Option<watch::Sender<f32>>,
        mut cancel: Option<oneshot::Receiver<()>>,
    ) -> Result<MediaAttachment> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        if bytes.len() > self.config.max_size {
            return Err(MediaError::TooLarge {
                size: bytes.len(),
                max: self.config.max_size,
            });
        }

        let content_hash = blake3::hash(&bytes).to_hex().to_string();
        let byte_size = bytes.len() as u64;

        let session = self
            .sink
            .begin(&content_hash, byte_size, mime_type)
            .await?;
        debug!(hash = %content_hash, size = byte_size, "upload started");

        let total = bytes.len();
        let mut sent = 0usize;
        for (index, chunk) in bytes.chunks(self.config.chunk_size).enumerate() {
            if cancelled(&mut cancel) {
                let _ = self.sink.abort(&session).await;
                info!(hash = %content_hash, "upload cancelled");
                return Err(MediaError::Cancelled);
            }

            if let Err(e) = self.sink.put_chunk(&session, index as u32, chunk).await {
                let _ = self.sink.abort(&session).await;
                warn!(hash = %content_hash, error = %e, "chunk transfer failed");
                return Err(e);
            }

            sent += chunk.len();
            if let Some(progress) = &progress {
                let _ = progress.send(sent as f32 / total as f32);
            }
        }

        if cancelled(&mut cancel) {
            let _ = self.sink.abort(&session).await;
            info!(hash = %content_hash, "upload cancelled before commit");
            return Err(MediaError::Cancelled);
        }

        let url = match self.sink.commit(&session).await {
            Ok(url) => url,
            Err(e) => {
                let _ = self.sink.abort(&session).await;
                warn!(hash = %content_hash, error = %e, "commit failed");
                return Err(e);
            }
        };

        info!(hash = %content_hash, url = %url, size = byte_size, "upload complete");
        Ok(MediaAttachment {
            url,
            content_hash,
            byte_size,
            mime_type: mime_type.to_string(),
        })
    }
}

/// A cancel that fired — or a dropped [`UploadTask`] — stops the transfer.
fn cancelled(cancel: &mut Option<oneshot::Receiver<()>>) -> bool {
    match cancel {
        Some(rx) => !matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
        None => false,
    }
}

/// Handle to a spawned upload.
pub struct UploadTask {
    progress: watch::Receiver<f32>,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<MediaAttachment>>,
}

impl UploadTask {
    /// Fractional progress in `[0, 1]`.
    pub fn progress(&self) -> watch::Receiver<f32> {
        self.progress.clone()
    }

    /// Request cancellation.  The task aborts its sink session; no
    /// attachment will ever be produced.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait for the upload to finish.
    pub async fn join(self) -> Result<MediaAttachment> {
        self.handle
            .await
            .map_err(|e| MediaError::UploadFailed(format!("Upload task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsChunkSink;
    use crate::sink::SinkSession;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn fs_pipeline(chunk_size: usize) -> (MediaUploadPipeline, Arc<FsChunkSink>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FsChunkSink::new(dir.path().to_path_buf()).await.unwrap());
        let pipeline = MediaUploadPipeline::with_config(
            Arc::clone(&sink) as Arc<dyn ChunkSink>,
            UploadConfig {
                chunk_size,
                max_size: 1024 * 1024,
            },
        );
        (pipeline, sink, dir)
    }

    /// Sink decorator that injects failures and slows chunk writes.
    struct FlakySink {
        inner: Arc<FsChunkSink>,
        fail_chunks_remaining: AtomicU32,
        chunk_delay: Duration,
        aborts: AtomicU32,
    }

    impl FlakySink {
        fn new(inner: Arc<FsChunkSink>) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_chunks_remaining: AtomicU32::new(0),
                chunk_delay: Duration::ZERO,
                aborts: AtomicU32::new(0),
            })
        }

        fn slow(inner: Arc<FsChunkSink>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner,
                fail_chunks_remaining: AtomicU32::new(0),
                chunk_delay: delay,
                aborts: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChunkSink for FlakySink {
        async fn begin(
            &self,
            content_hash: &str,
            byte_size: u64,
            mime_type: &str,
        ) -> Result<SinkSession> {
            self.inner.begin(content_hash, byte_size, mime_type).await
        }

        async fn put_chunk(&self, session: &SinkSession, index: u32, chunk: &[u8]) -> Result<()> {
            if self.chunk_delay > Duration::ZERO {
                tokio::time::sleep(self.chunk_delay).await;
            }
            let remaining = self.fail_chunks_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_chunks_remaining
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(MediaError::UploadFailed("chunk refused".to_string()));
            }
            self.inner.put_chunk(session, index, chunk).await
        }

        async fn commit(&self, session: &SinkSession) -> Result<String> {
            self.inner.commit(session).await
        }

        async fn abort(&self, session: &SinkSession) -> Result<()> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            self.inner.abort(session).await
        }
    }

    #[tokio::test]
    async fn upload_produces_content_addressed_attachment() {
        let (pipeline, sink, _dir) = fs_pipeline(8).await;
        let data = Bytes::from_static(b"une photo de vacances");

        let attachment = pipeline.upload(data.clone(), "image/jpeg").await.unwrap();

        assert_eq!(attachment.content_hash, blake3::hash(&data).to_hex().to_string());
        assert_eq!(attachment.byte_size, data.len() as u64);
        assert_eq!(attachment.url, format!("blob://{}", attachment.content_hash));
        assert_eq!(attachment.mime_type, "image/jpeg");

        let stored = std::fs::read(sink.path_for(&attachment.content_hash)).unwrap();
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn empty_and_oversized_attachments_are_rejected() {
        let (pipeline, _sink, _dir) = fs_pipeline(8).await;

        assert!(matches!(
            pipeline.upload(Bytes::new(), "image/png").await,
            Err(MediaError::Empty)
        ));

        let big = Bytes::from(vec![0u8; 2 * 1024 * 1024]);
        assert!(matches!(
            pipeline.upload(big, "video/mp4").await,
            Err(MediaError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn failed_chunk_aborts_and_retry_succeeds() {
        let (_fs_pipeline, fs_sink, _dir) = fs_pipeline(8).await;
        let flaky = FlakySink::new(Arc::clone(&fs_sink));
        flaky.fail_chunks_remaining.store(1, Ordering::SeqCst);
        let pipeline = MediaUploadPipeline::with_config(
            Arc::clone(&flaky) as Arc<dyn ChunkSink>,
            UploadConfig {
                chunk_size: 8,
                max_size: 1024,
            },
        );
        let data = Bytes::from_static(b"reessayer avec les memes octets");

        assert!(matches!(
            pipeline.upload(data.clone(), "audio/ogg").await,
            Err(MediaError::UploadFailed(_))
        ));
        assert_eq!(flaky.aborts.load(Ordering::SeqCst), 1);

        // Same bytes, fresh invocation: succeeds.
        let attachment = pipeline.upload(data, "audio/ogg").await.unwrap();
        assert!(fs_sink.path_for(&attachment.content_hash).exists());
    }

    #[tokio::test]
    async fn progress_is_monotonic_and_reaches_one() {
        let (pipeline, _sink, _dir) = fs_pipeline(4).await;
        let data = Bytes::from(vec![7u8; 41]);

        let task = pipeline.start(data, "application/pdf");
        let mut progress = task.progress();

        let collector = tokio::spawn(async move {
            let mut values = Vec::new();
            while progress.changed().await.is_ok() {
                values.push(*progress.borrow());
            }
            values
        });

        task.join().await.unwrap();
        let values = collector.await.unwrap();

        assert!(!values.is_empty());
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*values.last().unwrap(), 1.0);
    }

    #[tokio::test]
    async fn cancellation_aborts_without_committing() {
        let dir = tempfile::tempdir().unwrap();
        let fs_sink = Arc::new(FsChunkSink::new(dir.path().to_path_buf()).await.unwrap());
        let slow = FlakySink::slow(Arc::clone(&fs_sink), Duration::from_millis(20));
        let pipeline = MediaUploadPipeline::with_config(
            Arc::clone(&slow) as Arc<dyn ChunkSink>,
            UploadConfig {
                chunk_size: 4,
                max_size: 1024,
            },
        );

        let data = Bytes::from(vec![1u8; 64]);
        let hash = blake3::hash(&data).to_hex().to_string();

        let mut task = pipeline.start(data, "video/mp4");
        tokio::time::sleep(Duration::from_millis(30)).await;
        task.cancel();

        assert!(matches!(task.join().await, Err(MediaError::Cancelled)));
        assert_eq!(slow.aborts.load(Ordering::SeqCst), 1);

        // No committed object and no staging leftovers: a message can
        // never reference this upload.
        assert!(!fs_sink.path_for(&hash).exists());
        let staging: Vec<_> = std::fs::read_dir(dir.path().join("staging"))
            .unwrap()
            .collect();
        assert!(staging.is_empty());
    }
}
