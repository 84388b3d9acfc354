//! # courrier-shared
//!
//! Domain types shared by every Courrier crate: conversation and message
//! models, the ordered-log cursor, notification events, and the retry
//! policy used wherever a transient failure is absorbed with backoff.

pub mod constants;
pub mod conversation;
pub mod cursor;
pub mod event;
pub mod message;
pub mod retry;
pub mod types;

pub use conversation::{Conversation, LastMessage};
pub use cursor::LogPosition;
pub use event::{DedupKey, NotificationEvent};
pub use message::{DeliveryStatus, MediaAttachment, Message, MessageBody};
pub use retry::RetryPolicy;
pub use types::{BroadcastId, ConversationId, DeviceId, MessageId, UserId};
