//! Recording fakes for the gateway, notifier, and token directory.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use courrier_shared::UserId;

use crate::error::{NotifyError, Result};
use crate::gateway::{LocalNotifier, NotificationPayload, PushGateway, PushToken, TokenDirectory};

/// Push gateway fake that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingGateway {
    token_calls: AtomicU32,
    tokens_granted: AtomicU32,
    deny_permission: AtomicBool,
    fail_token_remaining: AtomicU32,
    fail_send_remaining: AtomicU32,
    send_attempts: AtomicU32,
    subscribe_calls: AtomicU32,
    unsubscribe_calls: AtomicU32,
    topics: Mutex<BTreeSet<String>>,
    sends: Mutex<Vec<(String, NotificationPayload)>>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_permission(&self) {
        self.deny_permission.store(true, Ordering::SeqCst);
    }

    pub fn allow_permission(&self) {
        self.deny_permission.store(false, Ordering::SeqCst);
    }

    pub fn fail_token_times(&self, times: u32) {
        self.fail_token_remaining.store(times, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, times: u32) {
        self.fail_send_remaining.store(times, Ordering::SeqCst);
    }

    pub fn token_calls(&self) -> u32 {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> u32 {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> u32 {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Currently subscribed topics, sorted.
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .expect("topics lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Successful sends as `(target, payload)`, where target is
    /// `token:<t>` or `topic:<t>`.
    pub fn sends(&self) -> Vec<(String, NotificationPayload)> {
        self.sends.lock().expect("sends lock poisoned").clone()
    }

    fn try_send(&self, target: String, payload: &NotificationPayload) -> Result<()> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_send_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_send_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::GatewayUnavailable("send refused".to_string()));
        }
        self.sends
            .lock()
            .expect("sends lock poisoned")
            .push((target, payload.clone()));
        Ok(())
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn token(&self) -> Result<PushToken> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(NotifyError::PermissionDenied);
        }
        let remaining = self.fail_token_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_token_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::GatewayUnavailable(
                "token service down".to_string(),
            ));
        }
        let n = self.tokens_granted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PushToken(format!("token-{n}")))
    }

    async fn subscribe_topic(&self, topic: &str) -> Result<()> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.topics
            .lock()
            .expect("topics lock poisoned")
            .insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe_topic(&self, topic: &str) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.topics
            .lock()
            .expect("topics lock poisoned")
            .remove(topic);
        Ok(())
    }

    async fn send_to_token(&self, token: &PushToken, payload: &NotificationPayload) -> Result<()> {
        self.try_send(format!("token:{token}"), payload)
    }

    async fn send_to_topic(&self, topic: &str, payload: &NotificationPayload) -> Result<()> {
        self.try_send(format!("topic:{topic}"), payload)
    }
}

/// Local notification surface fake.
#[derive(Default)]
pub struct RecordingNotifier {
    fail_next: AtomicBool,
    presented: Mutex<Vec<NotificationPayload>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn presented(&self) -> Vec<NotificationPayload> {
        self.presented
            .lock()
            .expect("presented lock poisoned")
            .clone()
    }
}

#[async_trait]
impl LocalNotifier for RecordingNotifier {
    async fn present(&self, payload: &NotificationPayload) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(NotifyError::Presentation("platform refused".to_string()));
        }
        self.presented
            .lock()
            .expect("presented lock poisoned")
            .push(payload.clone());
        Ok(())
    }
}

/// Token directory fake backed by a map.
#[derive(Default)]
pub struct StaticDirectory {
    tokens: Mutex<HashMap<UserId, Vec<PushToken>>>,
}

impl StaticDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, user: UserId, tokens: Vec<PushToken>) {
        self.tokens
            .lock()
            .expect("tokens lock poisoned")
            .insert(user, tokens);
    }
}

#[async_trait]
impl TokenDirectory for StaticDirectory {
    async fn tokens_for(&self, user: &UserId) -> Result<Vec<PushToken>> {
        Ok(self
            .tokens
            .lock()
            .expect("tokens lock poisoned")
            .get(user)
            .cloned()
            .unwrap_or_default())
    }
}
