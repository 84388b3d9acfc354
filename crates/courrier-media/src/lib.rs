//! # courrier-media
//!
//! Attachment uploads: moves bytes to durable storage and produces a
//! stable, content-addressable [`MediaAttachment`] reference *before* any
//! message referencing it can be committed, so no message ever points at
//! an incomplete upload.
//!
//! The blob store is reached through the [`ChunkSink`] trait;
//! [`FsChunkSink`] is the filesystem implementation.
//!
//! [`MediaAttachment`]: courrier_shared::MediaAttachment

pub mod fs;
pub mod sink;
pub mod upload;

mod error;

pub use error::MediaError;
pub use fs::FsChunkSink;
pub use sink::{ChunkSink, SinkSession};
pub use upload::{MediaUploadPipeline, UploadConfig, UploadTask};
