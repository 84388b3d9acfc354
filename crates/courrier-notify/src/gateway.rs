//! Push-delivery collaborator contracts.
//!
//! The gateway is the platform push service (token lifecycle, topic
//! membership, delivery); the notifier is the local in-app notification
//! surface; the directory resolves a user id to their devices' push
//! tokens.  All three are trait seams so tests and alternative transport
//! backends plug in without touching the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courrier_shared::{NotificationEvent, UserId};

use crate::error::Result;

/// Opaque push token handed out by the platform gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PushToken(pub String);

impl std::fmt::Display for PushToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What actually gets presented, on either channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    /// Opaque deep-link data for the receiving app.
    pub data: serde_json::Value,
    /// Platform notification channel tag.
    pub channel_tag: String,
}

impl NotificationPayload {
    pub fn from_event(event: &NotificationEvent) -> Self {
        let channel_tag = match event {
            NotificationEvent::NewMessage { .. } => "messages",
            NotificationEvent::GroupMessage { .. } => "groups",
            NotificationEvent::Broadcast { .. } => "broadcasts",
        };
        Self {
            title: event.title().to_string(),
            body: event.body().to_string(),
            data: event.payload(),
            channel_tag: channel_tag.to_string(),
        }
    }
}

/// Contract of the platform push gateway.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Obtain this device's push token.  Suspends until the platform hands
    /// one out, or fails with `PermissionDenied` / `GatewayUnavailable`.
    async fn token(&self) -> Result<PushToken>;

    async fn subscribe_topic(&self, topic: &str) -> Result<()>;

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()>;

    async fn send_to_token(&self, token: &PushToken, payload: &NotificationPayload) -> Result<()>;

    async fn send_to_topic(&self, topic: &str, payload: &NotificationPayload) -> Result<()>;
}

/// Contract of the local in-app notification surface.
#[async_trait]
pub trait LocalNotifier: Send + Sync {
    async fn present(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Resolves a user to the push tokens of their registered devices.
///
/// Backed by the remote store's device registrations; direct-message
/// fanout goes through here.
#[async_trait]
pub trait TokenDirectory: Send + Sync {
    async fn tokens_for(&self, user: &UserId) -> Result<Vec<PushToken>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use courrier_shared::{BroadcastId, Conversation, Message, MessageBody};

    #[test]
    fn payload_from_direct_message() {
        let conversation = Conversation::direct(UserId::new("alice"), UserId::new("bob"));
        let message = Message::new(
            conversation.id,
            UserId::new("alice"),
            "Alice".to_string(),
            MessageBody::Text {
                text: "on y va ?".to_string(),
            },
            chrono::Utc::now(),
        );
        let event = NotificationEvent::for_message(&conversation, &message);

        let payload = NotificationPayload::from_event(&event);
        assert_eq!(payload.title, "Alice");
        assert_eq!(payload.body, "on y va ?");
        assert_eq!(payload.channel_tag, "messages");
        assert_eq!(payload.data["type"], "message");
    }

    #[test]
    fn payload_from_broadcast() {
        let event = NotificationEvent::Broadcast {
            broadcast_id: BroadcastId::new(),
            title: "Maintenance".to_string(),
            body: "ce soir à 22h".to_string(),
        };
        let payload = NotificationPayload::from_event(&event);
        assert_eq!(payload.channel_tag, "broadcasts");
        assert_eq!(payload.data["type"], "broadcast");
    }
}
