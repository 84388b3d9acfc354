//! This device's identity in the push-delivery system.
//!
//! The registry is the single source of truth for "what this device is
//! currently registered for": the push token, the owning user, and topic
//! memberships.  No other component talks topics to the gateway directly.
//! Registration state is persisted through `courrier-store` so it survives
//! restarts; runtime state sits behind one async mutex so a
//! platform-initiated token refresh cannot race `ensure_registered`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use courrier_shared::constants::TOPIC_ALL_USERS;
use courrier_shared::{ConversationId, DeviceId, RetryPolicy, UserId};
use courrier_store::{Database, DeviceRecord};

use crate::error::{NotifyError, Result};
use crate::gateway::{PushGateway, PushToken};

/// Configuration for the device registry.
#[derive(Clone)]
pub struct RegistryConfig {
    /// Platform tag recorded with the registration ("android", "ios", ...).
    pub platform: String,
    /// Backoff schedule for token acquisition while the gateway is down.
    pub token_retry: RetryPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            platform: "desktop".to_string(),
            token_retry: RetryPolicy::default(),
        }
    }
}

/// Read-only view of the current registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub device_id: DeviceId,
    pub user_id: Option<UserId>,
    pub push_token: Option<PushToken>,
    pub permission_denied: bool,
    pub topics: Vec<String>,
}

struct RegistryState {
    record: DeviceRecord,
    topics: HashSet<String>,
}

/// Owns this device's push registration and topic memberships.
pub struct DeviceRegistry {
    gateway: Arc<dyn PushGateway>,
    store: Arc<StdMutex<Database>>,
    state: Mutex<RegistryState>,
    config: RegistryConfig,
}

impl DeviceRegistry {
    /// Load (or create) the registration row and the persisted topic set.
    pub fn new(
        gateway: Arc<dyn PushGateway>,
        store: Arc<StdMutex<Database>>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let (record, topics) = {
            let db = store.lock().expect("store lock poisoned");
            let record = match db.load_device()? {
                Some(record) => record,
                None => {
                    let record = DeviceRecord::new(config.platform.clone());
                    db.save_device(&record)?;
                    info!(device = %record.device_id, "created device registration");
                    record
                }
            };
            let topics: HashSet<String> = db.topics()?.into_iter().collect();
            (record, topics)
        };

        Ok(Self {
            gateway,
            store,
            state: Mutex::new(RegistryState { record, topics }),
            config,
        })
    }

    /// Obtain a push token for `user` and subscribe the baseline topics
    /// (`all-users` and `user:<uid>`).
    ///
    /// Suspends while the gateway is unavailable, retrying with backoff.
    /// A recorded permission denial short-circuits until
    /// [`reset_permission`](Self::reset_permission) is called.
    pub async fn ensure_registered(&self, user: &UserId) -> Result<PushToken> {
        let mut state = self.state.lock().await;

        if state.record.permission_denied {
            return Err(NotifyError::PermissionDenied);
        }

        let same_user = state.record.user_id.as_ref() == Some(user);
        if let (true, Some(token)) = (same_user, state.record.push_token.clone()) {
            let token = PushToken(token);
            self.join_baseline_topics(&mut state, user).await;
            return Ok(token);
        }

        let mut attempt = 0u32;
        let token = loop {
            match self.gateway.token().await {
                Ok(token) => break token,
                Err(NotifyError::PermissionDenied) => {
                    state.record.permission_denied = true;
                    state.record.updated_at = Utc::now();
                    self.persist(&state.record)?;
                    warn!(device = %state.record.device_id, "notification permission denied");
                    return Err(NotifyError::PermissionDenied);
                }
                Err(e) => {
                    if self.config.token_retry.is_exhausted(attempt) {
                        return Err(e);
                    }
                    let delay = self.config.token_retry.delay_for(attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(error = %e, attempt, "token acquisition failed, backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        };

        state.record.user_id = Some(user.clone());
        state.record.push_token = Some(token.0.clone());
        state.record.updated_at = Utc::now();
        self.persist(&state.record)?;
        info!(device = %state.record.device_id, user = %user, "device registered for push");

        self.join_baseline_topics(&mut state, user).await;
        Ok(token)
    }

    /// Platform-initiated token refresh.  May fire at any time, including
    /// while backgrounded; serialized against `ensure_registered` by the
    /// state mutex, and a refresh to the unchanged token is a no-op.
    pub async fn handle_token_refresh(&self, new_token: PushToken) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.record.push_token.as_deref() == Some(new_token.0.as_str()) {
            debug!(device = %state.record.device_id, "token refresh carried no change");
            return Ok(());
        }

        state.record.push_token = Some(new_token.0);
        state.record.updated_at = Utc::now();
        self.persist(&state.record)?;
        info!(device = %state.record.device_id, "push token refreshed");
        Ok(())
    }

    /// Subscribe a topic.  Idempotent: returns `false` without a gateway
    /// call when the membership already exists.
    pub async fn subscribe_topic(&self, topic: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.subscribe_locked(&mut state, topic).await
    }

    /// Unsubscribe a topic.  Idempotent.
    pub async fn unsubscribe_topic(&self, topic: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.topics.contains(topic) {
            return Ok(false);
        }
        self.gateway.unsubscribe_topic(topic).await?;
        state.topics.remove(topic);
        {
            let db = self.store.lock().expect("store lock poisoned");
            db.remove_topic(topic)?;
        }
        debug!(topic, "topic unsubscribed");
        Ok(true)
    }

    /// Join a conversation's topic when its view opens.
    pub async fn enter_conversation(&self, conversation_id: ConversationId) -> Result<bool> {
        self.subscribe_topic(&conversation_id.to_topic()).await
    }

    /// Leave a conversation's topic when its view closes.
    pub async fn leave_conversation(&self, conversation_id: ConversationId) -> Result<bool> {
        self.unsubscribe_topic(&conversation_id.to_topic()).await
    }

    /// Logout: drop every topic membership and detach the user.
    pub async fn deregister(&self) -> Result<()> {
        let mut state = self.state.lock().await;

        let topics: Vec<String> = state.topics.iter().cloned().collect();
        for topic in topics {
            if let Err(e) = self.gateway.unsubscribe_topic(&topic).await {
                warn!(topic, error = %e, "unsubscribe failed during deregister");
            }
            state.topics.remove(&topic);
            let db = self.store.lock().expect("store lock poisoned");
            db.remove_topic(&topic)?;
        }

        state.record.user_id = None;
        state.record.updated_at = Utc::now();
        self.persist(&state.record)?;
        info!(device = %state.record.device_id, "device deregistered");
        Ok(())
    }

    /// Allow registration again after the user granted permission.
    pub async fn reset_permission(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.record.permission_denied {
            state.record.permission_denied = false;
            state.record.updated_at = Utc::now();
            self.persist(&state.record)?;
        }
        Ok(())
    }

    /// Current registration, for the router and for UI.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.lock().await;
        let mut topics: Vec<String> = state.topics.iter().cloned().collect();
        topics.sort();
        RegistrySnapshot {
            device_id: state.record.device_id,
            user_id: state.record.user_id.clone(),
            push_token: state.record.push_token.clone().map(PushToken),
            permission_denied: state.record.permission_denied,
            topics,
        }
    }

    async fn join_baseline_topics(&self, state: &mut RegistryState, user: &UserId) {
        for topic in [TOPIC_ALL_USERS.to_string(), user.to_topic()] {
            if let Err(e) = self.subscribe_locked(state, &topic).await {
                warn!(topic, error = %e, "baseline topic subscription failed");
            }
        }
    }

    async fn subscribe_locked(&self, state: &mut RegistryState, topic: &str) -> Result<bool> {
        if state.topics.contains(topic) {
            return Ok(false);
        }
        self.gateway.subscribe_topic(topic).await?;
        state.topics.insert(topic.to_string());
        {
            let db = self.store.lock().expect("store lock poisoned");
            db.add_topic(topic)?;
        }
        debug!(topic, "topic subscribed");
        Ok(true)
    }

    fn persist(&self, record: &DeviceRecord) -> Result<()> {
        let db = self.store.lock().expect("store lock poisoned");
        db.save_device(record)?;
        Ok(())
    }
}
