//! Position in a conversation's ordered message log.
//!
//! The cursor is an opaque pair of (server timestamp, message id). Ordering
//! is by timestamp first; ties — which happen under burst sends sharing a
//! server timestamp — are broken by message id so the total order is stable
//! across re-subscriptions.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::MessageId;

/// A resumable position in the timestamp-descending message log.
///
/// Consumed and produced by the stream manager for backward pagination;
/// never persisted beyond a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    pub timestamp: DateTime<Utc>,
    pub message_id: MessageId,
}

impl LogPosition {
    pub fn new(timestamp: DateTime<Utc>, message_id: MessageId) -> Self {
        Self {
            timestamp,
            message_id,
        }
    }
}

impl PartialOrd for LogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.message_id.cmp(&other.message_id))
    }
}

/// Sort messages newest-first by `(timestamp, id)`.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.position().cmp(&a.position()));
}
