use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::{ConversationId, UserId};

/// Denormalized preview of the most recent message, used for list rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub text: String,
    pub sender_name: String,
    pub timestamp: DateTime<Utc>,
}

/// A direct or group message thread.
///
/// Owned by the remote store and mutated by any participant's write path;
/// never deleted by this core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub id: ConversationId,
    /// Participant ids: exactly 2 for direct threads, more for groups.
    pub participants: BTreeSet<UserId>,
    /// Whether this is a group thread.
    pub is_group: bool,
    /// Cached preview of the latest message.
    pub last_message: Option<LastMessage>,
}

impl Conversation {
    /// Create a direct (two-participant) thread.
    pub fn direct(a: UserId, b: UserId) -> Self {
        Self {
            id: ConversationId::new(),
            participants: BTreeSet::from([a, b]),
            is_group: false,
            last_message: None,
        }
    }

    /// Create a group thread.
    pub fn group(participants: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            id: ConversationId::new(),
            participants: participants.into_iter().collect(),
            is_group: true,
            last_message: None,
        }
    }

    /// Participants other than `me`.
    pub fn others<'a>(&'a self, me: &'a UserId) -> impl Iterator<Item = &'a UserId> {
        self.participants.iter().filter(move |p| *p != me)
    }

    /// Refresh the denormalized preview from a newly appended message.
    pub fn touch(&mut self, message: &Message) {
        self.last_message = Some(LastMessage {
            text: message.body.preview(),
            sender_name: message.sender_name.clone(),
            timestamp: message.timestamp,
        });
    }
}
