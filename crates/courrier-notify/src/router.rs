//! Event-to-channel routing.
//!
//! One perceivable channel per event per device: a local in-app
//! presentation when this device is foregrounded on the event's
//! conversation, a push dispatch otherwise.  A bounded, time-windowed LRU
//! of dedup keys guarantees the same event is never delivered twice, even
//! when the store redelivers it.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use lru::LruCache;
use tracing::{debug, info, warn};

use courrier_shared::constants::{
    DEDUP_CAPACITY, DEDUP_WINDOW, PUSH_BACKOFF_BASE, PUSH_BACKOFF_MAX, PUSH_MAX_ATTEMPTS,
    TOPIC_ALL_USERS,
};
use courrier_shared::{ConversationId, NotificationEvent, RetryPolicy};

use crate::gateway::{LocalNotifier, NotificationPayload, PushGateway, PushToken, TokenDirectory};

/// Configuration for the notification router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Dedup keys remembered at most.
    pub dedup_capacity: usize,
    /// How long a remembered key keeps suppressing redelivery.
    pub dedup_window: Duration,
    /// Backoff schedule for push dispatch; delivery is best-effort and the
    /// event is dropped once the attempts are spent.
    pub push_retry: RetryPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: DEDUP_CAPACITY,
            dedup_window: DEDUP_WINDOW,
            push_retry: RetryPolicy::new(PUSH_BACKOFF_BASE, PUSH_BACKOFF_MAX, PUSH_MAX_ATTEMPTS),
        }
    }
}

/// What the router did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterOutcome {
    /// Presented in-app; no push went out.
    LocalPresented,
    /// Pushed through the gateway to `fanout` targets.
    PushDispatched { fanout: usize },
    /// The dedup key was seen inside the window.
    DroppedDuplicate,
    /// Every dispatch target failed or none existed.
    DroppedUndeliverable,
}

/// Routes each notification event through exactly one channel.
pub struct NotificationRouter {
    gateway: Arc<dyn PushGateway>,
    notifier: Arc<dyn LocalNotifier>,
    directory: Arc<dyn TokenDirectory>,
    dedup: Mutex<LruCache<courrier_shared::DedupKey, Instant>>,
    foreground: Mutex<Option<ConversationId>>,
    config: RouterConfig,
}

impl NotificationRouter {
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        notifier: Arc<dyn LocalNotifier>,
        directory: Arc<dyn TokenDirectory>,
    ) -> Self {
        Self::with_config(gateway, notifier, directory, RouterConfig::default())
    }

    pub fn with_config(
        gateway: Arc<dyn PushGateway>,
        notifier: Arc<dyn LocalNotifier>,
        directory: Arc<dyn TokenDirectory>,
        config: RouterConfig,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.dedup_capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            gateway,
            notifier,
            directory,
            dedup: Mutex::new(LruCache::new(capacity)),
            foreground: Mutex::new(None),
            config,
        }
    }

    /// Record which conversation this device is currently displaying, if
    /// any.  Events for the foregrounded conversation are presented in-app
    /// instead of pushed.
    pub fn set_foreground(&self, conversation_id: Option<ConversationId>) {
        let mut foreground = self.foreground.lock().expect("foreground lock poisoned");
        *foreground = conversation_id;
    }

    /// Route one event.  Never blocks message send/receive: all failures
    /// are absorbed here and reported through the outcome.
    pub async fn route(&self, event: &NotificationEvent) -> RouterOutcome {
        let key = event.dedup_key();
        {
            let mut dedup = self.dedup.lock().expect("dedup lock poisoned");
            if let Some(seen_at) = dedup.get(&key) {
                if seen_at.elapsed() < self.config.dedup_window {
                    debug!(key = %key, "duplicate event dropped");
                    return RouterOutcome::DroppedDuplicate;
                }
            }
            dedup.put(key.clone(), Instant::now());
        }

        let payload = NotificationPayload::from_event(event);

        // Broadcasts always push; a foregrounded viewer only suppresses the
        // push for their own conversation.
        let foregrounded = match event.conversation_id() {
            Some(conversation_id) => {
                let foreground = self.foreground.lock().expect("foreground lock poisoned");
                *foreground == Some(conversation_id)
            }
            None => false,
        };

        if foregrounded {
            if let Err(e) = self.notifier.present(&payload).await {
                warn!(key = %key, error = %e, "local presentation failed");
            }
            debug!(key = %key, "event presented locally");
            return RouterOutcome::LocalPresented;
        }

        match event {
            NotificationEvent::NewMessage { recipients, .. } => {
                let mut tokens: Vec<PushToken> = Vec::new();
                for recipient in recipients {
                    match self.directory.tokens_for(recipient).await {
                        Ok(mut found) => tokens.append(&mut found),
                        Err(e) => {
                            warn!(recipient = %recipient, error = %e, "token lookup failed");
                        }
                    }
                }
                if tokens.is_empty() {
                    warn!(key = %key, "no push tokens for any recipient");
                    return RouterOutcome::DroppedUndeliverable;
                }

                let sends = tokens
                    .iter()
                    .map(|token| self.send_with_retry(PushTarget::Token(token), &payload));
                let fanout = join_all(sends).await.into_iter().filter(|ok| *ok).count();

                if fanout == 0 {
                    return RouterOutcome::DroppedUndeliverable;
                }
                info!(key = %key, fanout, "event pushed to recipient tokens");
                RouterOutcome::PushDispatched { fanout }
            }

            NotificationEvent::GroupMessage {
                conversation_id, ..
            } => {
                let topic = conversation_id.to_topic();
                if self
                    .send_with_retry(PushTarget::Topic(&topic), &payload)
                    .await
                {
                    info!(key = %key, topic = %topic, "event pushed to group topic");
                    RouterOutcome::PushDispatched { fanout: 1 }
                } else {
                    RouterOutcome::DroppedUndeliverable
                }
            }

            NotificationEvent::Broadcast { .. } => {
                if self
                    .send_with_retry(PushTarget::Topic(TOPIC_ALL_USERS), &payload)
                    .await
                {
                    info!(key = %key, "broadcast pushed to all users");
                    RouterOutcome::PushDispatched { fanout: 1 }
                } else {
                    RouterOutcome::DroppedUndeliverable
                }
            }
        }
    }

    /// Run one push dispatch with capped, jittered backoff.  Returns
    /// `false` once the attempt budget is spent; the caller drops the
    /// event with a logged error.
    async fn send_with_retry(&self, target: PushTarget<'_>, payload: &NotificationPayload) -> bool {
        let mut attempt = 0u32;
        loop {
            let sent = match target {
                PushTarget::Token(token) => self.gateway.send_to_token(token, payload).await,
                PushTarget::Topic(topic) => self.gateway.send_to_topic(topic, payload).await,
            };
            match sent {
                Ok(()) => return true,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if self.config.push_retry.is_exhausted(attempt) {
                        warn!(error = %e, attempts = attempt, "push dispatch dropped");
                        return false;
                    }
                    let delay = self.config.push_retry.delay_for(attempt - 1);
                    debug!(error = %e, attempt, "push dispatch failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// One push dispatch target.
#[derive(Clone, Copy)]
enum PushTarget<'a> {
    Token(&'a PushToken),
    Topic(&'a str),
}
