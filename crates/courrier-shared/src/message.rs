use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::LogPosition;
use crate::types::{ConversationId, MessageId, UserId};

/// Reference to an uploaded media object.
///
/// Only produced by the upload pipeline once the bytes are durably stored,
/// so a message carrying one never points at an incomplete upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaAttachment {
    /// Stable URL of the stored object.
    pub url: String,
    /// BLAKE3 hash of the uploaded bytes (hex).
    pub content_hash: String,
    /// Size of the stored object in bytes.
    pub byte_size: u64,
    /// MIME type declared at upload time.
    pub mime_type: String,
}

/// Message content, tagged by variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        attachment: MediaAttachment,
        caption: Option<String>,
    },
    Video {
        attachment: MediaAttachment,
        caption: Option<String>,
    },
    Audio {
        attachment: MediaAttachment,
    },
    Document {
        attachment: MediaAttachment,
        file_name: String,
    },
}

impl MessageBody {
    /// Short preview used for conversation list rows and push bodies.
    pub fn preview(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { .. } => "[photo]".to_string(),
            Self::Video { .. } => "[vidéo]".to_string(),
            Self::Audio { .. } => "[audio]".to_string(),
            Self::Document { file_name, .. } => format!("[document] {file_name}"),
        }
    }

    /// The media reference, if this variant carries one.
    pub fn attachment(&self) -> Option<&MediaAttachment> {
        match self {
            Self::Text { .. } => None,
            Self::Image { attachment, .. }
            | Self::Video { attachment, .. }
            | Self::Audio { attachment }
            | Self::Document { attachment, .. } => Some(attachment),
        }
    }
}

/// Derived delivery state; computed from `read_by`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// A single chat message.
///
/// The body is immutable after creation; the only permitted mutation is
/// appending reader ids to `read_by` (the set never shrinks).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Sender's user id.
    pub sender_id: UserId,
    /// Sender's display name, denormalized at send time.
    pub sender_name: String,
    /// Message content.
    pub body: MessageBody,
    /// Server-assigned timestamp, monotonically non-decreasing per
    /// conversation.
    pub timestamp: DateTime<Utc>,
    /// Ids of participants who have read this message. Append-only.
    pub read_by: BTreeSet<UserId>,
}

impl Message {
    pub fn new(
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_name: String,
        body: MessageBody,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            sender_name,
            body,
            timestamp,
            read_by: BTreeSet::new(),
        }
    }

    /// This message's position in the conversation log.
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.timestamp, self.id)
    }

    /// Derived delivery state given the conversation's participant set:
    /// `Read` once every other participant is in `read_by`, `Delivered`
    /// once at least one is, `Sent` otherwise.
    pub fn status(&self, participants: &BTreeSet<UserId>) -> DeliveryStatus {
        let mut any = false;
        let mut all = true;
        for p in participants.iter().filter(|p| **p != self.sender_id) {
            if self.read_by.contains(p) {
                any = true;
            } else {
                all = false;
            }
        }
        if any && all {
            DeliveryStatus::Read
        } else if any {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants(ids: &[&str]) -> BTreeSet<UserId> {
        ids.iter().map(|s| UserId::new(*s)).collect()
    }

    fn text_msg(sender: &str) -> Message {
        Message::new(
            ConversationId::new(),
            UserId::new(sender),
            sender.to_string(),
            MessageBody::Text {
                text: "bonjour".to_string(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn status_sent_until_someone_reads() {
        let msg = text_msg("alice");
        let group = participants(&["alice", "bob", "carol"]);
        assert_eq!(msg.status(&group), DeliveryStatus::Sent);
    }

    #[test]
    fn status_delivered_with_partial_reads() {
        let mut msg = text_msg("alice");
        msg.read_by.insert(UserId::new("bob"));
        let group = participants(&["alice", "bob", "carol"]);
        assert_eq!(msg.status(&group), DeliveryStatus::Delivered);
    }

    #[test]
    fn status_read_when_all_others_have_read() {
        let mut msg = text_msg("alice");
        msg.read_by.insert(UserId::new("bob"));
        msg.read_by.insert(UserId::new("carol"));
        let group = participants(&["alice", "bob", "carol"]);
        assert_eq!(msg.status(&group), DeliveryStatus::Read);
    }

    #[test]
    fn sender_read_mark_does_not_count() {
        let mut msg = text_msg("alice");
        msg.read_by.insert(UserId::new("alice"));
        let direct = participants(&["alice", "bob"]);
        assert_eq!(msg.status(&direct), DeliveryStatus::Sent);
    }

    #[test]
    fn media_preview_tags() {
        let attachment = MediaAttachment {
            url: "blob://abc".to_string(),
            content_hash: "00".repeat(32),
            byte_size: 4,
            mime_type: "image/png".to_string(),
        };
        let body = MessageBody::Image {
            attachment,
            caption: None,
        };
        assert_eq!(body.preview(), "[photo]");
        assert!(body.attachment().is_some());
    }

    #[test]
    fn body_serde_round_trip() {
        let body = MessageBody::Document {
            attachment: MediaAttachment {
                url: "blob://doc".to_string(),
                content_hash: "11".repeat(32),
                byte_size: 1024,
                mime_type: "application/pdf".to_string(),
            },
            file_name: "contrat.pdf".to_string(),
        };
        let json = serde_json::to_string(&body).unwrap();
        let restored: MessageBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, restored);
    }
}
