use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversation::Conversation;
use crate::message::Message;
use crate::types::{BroadcastId, ConversationId, MessageId, UserId};

/// Stable identifier used to recognize an already-routed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn message(conversation_id: ConversationId, message_id: MessageId) -> Self {
        Self(format!("{conversation_id}:{message_id}"))
    }

    pub fn broadcast(broadcast_id: BroadcastId) -> Self {
        Self(format!("broadcast:{broadcast_id}"))
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message or broadcast event handed to the notification router.
///
/// Ephemeral; carries everything the router needs to pick a channel and
/// build a payload, and nothing is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
    /// A new message in a direct thread, targeting explicit recipients.
    NewMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        sender_id: UserId,
        sender_name: String,
        recipients: Vec<UserId>,
        preview: String,
    },
    /// A new message in a group thread, targeting the conversation topic.
    GroupMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        sender_id: UserId,
        sender_name: String,
        preview: String,
    },
    /// An announcement for every registered device.
    Broadcast {
        broadcast_id: BroadcastId,
        title: String,
        body: String,
    },
}

impl NotificationEvent {
    /// Classify a freshly appended message against its conversation.
    pub fn for_message(conversation: &Conversation, message: &Message) -> Self {
        if conversation.is_group {
            Self::GroupMessage {
                conversation_id: conversation.id,
                message_id: message.id,
                sender_id: message.sender_id.clone(),
                sender_name: message.sender_name.clone(),
                preview: message.body.preview(),
            }
        } else {
            Self::NewMessage {
                conversation_id: conversation.id,
                message_id: message.id,
                sender_id: message.sender_id.clone(),
                sender_name: message.sender_name.clone(),
                recipients: conversation.others(&message.sender_id).cloned().collect(),
                preview: message.body.preview(),
            }
        }
    }

    pub fn dedup_key(&self) -> DedupKey {
        match self {
            Self::NewMessage {
                conversation_id,
                message_id,
                ..
            }
            | Self::GroupMessage {
                conversation_id,
                message_id,
                ..
            } => DedupKey::message(*conversation_id, *message_id),
            Self::Broadcast { broadcast_id, .. } => DedupKey::broadcast(*broadcast_id),
        }
    }

    /// Notification title: the sender's display name, or the broadcast title.
    pub fn title(&self) -> &str {
        match self {
            Self::NewMessage { sender_name, .. } | Self::GroupMessage { sender_name, .. } => {
                sender_name
            }
            Self::Broadcast { title, .. } => title,
        }
    }

    /// Notification body: the message preview, or the broadcast body.
    pub fn body(&self) -> &str {
        match self {
            Self::NewMessage { preview, .. } | Self::GroupMessage { preview, .. } => preview,
            Self::Broadcast { body, .. } => body,
        }
    }

    /// The conversation this event belongs to, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::NewMessage {
                conversation_id, ..
            }
            | Self::GroupMessage {
                conversation_id, ..
            } => Some(*conversation_id),
            Self::Broadcast { .. } => None,
        }
    }

    /// Opaque data payload attached to a push or local presentation, used by
    /// the receiving app to deep-link into the right screen.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::NewMessage {
                conversation_id,
                message_id,
                sender_id,
                ..
            } => json!({
                "type": "message",
                "conversationId": conversation_id.to_string(),
                "messageId": message_id.to_string(),
                "senderId": sender_id.to_string(),
            }),
            Self::GroupMessage {
                conversation_id,
                message_id,
                sender_id,
                ..
            } => json!({
                "type": "group_message",
                "conversationId": conversation_id.to_string(),
                "messageId": message_id.to_string(),
                "senderId": sender_id.to_string(),
            }),
            Self::Broadcast { broadcast_id, .. } => json!({
                "type": "broadcast",
                "broadcastId": broadcast_id.to_string(),
            }),
        }
    }
}
