//! The remote ordered store boundary.
//!
//! The store owns every conversation's message log; this core only consumes
//! it.  Timestamps are server-assigned and monotonically non-decreasing
//! within a conversation, and subscription events are delivered at least
//! once — duplicates are expected and filtered by the stream manager.

use async_trait::async_trait;
use tokio::sync::mpsc;

use courrier_shared::{ConversationId, LogPosition, Message, MessageId, UserId};

use crate::error::Result;

/// A live subscription to one conversation's log.
///
/// Each item is an ordered snapshot of the most recent `limit` messages at
/// the time of emission.  The stream ending (`None`) signals that the
/// subscription dropped and must be re-established.
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<Message>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Vec<Message>>) -> Self {
        Self { receiver }
    }

    /// Wait for the next snapshot, or `None` once the subscription dropped.
    pub async fn next_snapshot(&mut self) -> Option<Vec<Message>> {
        self.receiver.recv().await
    }
}

/// One entry of an atomic read-state batch: append `reader` to the
/// message's `read_by` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub reader: UserId,
}

/// Contract of the remote ordered store.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Establish a live subscription bounded to the most recent `limit`
    /// messages.  The initial snapshot is delivered immediately after.
    async fn subscribe(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Subscription>;

    /// Fetch up to `limit` messages strictly older than `before`, newest
    /// first.  `None` starts from the tail of the log.
    async fn query_before(
        &self,
        conversation_id: ConversationId,
        before: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Apply a whole read-receipt batch as one atomic multi-message update.
    /// Set-union semantics: commutative across devices, ids are never
    /// removed.
    async fn apply_read_receipts(
        &self,
        conversation_id: ConversationId,
        receipts: &[ReadReceipt],
    ) -> Result<()>;

    /// Append a message to the log.  The store assigns the authoritative
    /// timestamp and returns the stored message.
    async fn append(&self, conversation_id: ConversationId, message: Message) -> Result<Message>;
}
