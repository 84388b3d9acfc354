//! # courrier-sync
//!
//! Conversation synchronization: presents one gap-free, duplicate-free,
//! newest-first message sequence per conversation, backed by a live
//! subscription for new messages and backward pagination for history, and
//! reconciles read receipts across this user's devices.
//!
//! The remote ordered store is reached through the [`MessageLog`] trait;
//! [`MemoryMessageLog`] is an in-process implementation used by tests and
//! local development.

pub mod log;
pub mod memory;
pub mod receipts;
pub mod stream;

mod error;

pub use error::SyncError;
pub use log::{MessageLog, ReadReceipt, Subscription};
pub use memory::MemoryMessageLog;
pub use receipts::ReadReceiptReconciler;
pub use stream::{OlderPage, StreamConfig, StreamHandle, StreamManager, StreamState, StreamUpdate};
