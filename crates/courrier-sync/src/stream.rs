//! Per-conversation stream orchestration with the tokio mpsc
//! command/update pattern.
//!
//! Each open conversation runs one dedicated task that merges the live
//! subscription and backward pagination into a single gap-free,
//! duplicate-free, newest-first sequence.  External code communicates with
//! the task through a typed command channel and receives ordered batches on
//! an update channel, keeping every conversation isolated from the others.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use courrier_shared::constants::{CHANNEL_CAPACITY, RECONNECT_BACKOFF_BASE, RECONNECT_BACKOFF_MAX};
use courrier_shared::cursor::sort_newest_first;
use courrier_shared::{ConversationId, LogPosition, Message, MessageId, RetryPolicy};
use courrier_store::Database;

use crate::error::{Result, SyncError};
use crate::log::{MessageLog, Subscription};

// ---------------------------------------------------------------------------
// Command / update types
// ---------------------------------------------------------------------------

/// Commands sent *into* the stream task.
enum StreamCommand {
    /// Fetch the next page strictly older than everything seen so far.
    LoadOlder(oneshot::Sender<Result<OlderPage>>),
    /// Release the subscription and stop the task.
    Close,
}

/// Updates sent *from* the stream task to the consumer.
#[derive(Debug, Clone)]
pub enum StreamUpdate {
    /// Newly observed messages, deduplicated and newest first.
    Messages(Vec<Message>),
    /// Connection state transition.
    State(StreamState),
}

/// Connection state of one conversation stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Subscribing,
    Live,
    Reconnecting,
    Closed,
}

/// Result of a [`StreamHandle::load_older`] call.
#[derive(Debug, Clone)]
pub struct OlderPage {
    /// Older messages not seen before, newest first.
    pub messages: Vec<Message>,
    /// `false` once the oldest message in the log has been reached.
    pub has_more: bool,
}

/// Configuration for opening conversation streams.
#[derive(Clone)]
pub struct StreamConfig {
    /// Backoff schedule for re-establishing a dropped subscription.
    /// Reconnection never gives up; only `close` ends the stream.
    pub reconnect: RetryPolicy,
    /// Optional local cache; delivered batches are written through so the
    /// UI has stale-but-present data after a cold start.
    pub cache: Option<Arc<Mutex<Database>>>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect: RetryPolicy::new(RECONNECT_BACKOFF_BASE, RECONNECT_BACKOFF_MAX, u32::MAX),
            cache: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Manager / handle
// ---------------------------------------------------------------------------

/// Opens conversation streams against a remote message log.
///
/// Construct one per process and share it; each `open` spawns an
/// independent per-conversation task.
pub struct StreamManager {
    log: Arc<dyn MessageLog>,
    config: StreamConfig,
}

impl StreamManager {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self::with_config(log, StreamConfig::default())
    }

    pub fn with_config(log: Arc<dyn MessageLog>, config: StreamConfig) -> Self {
        Self { log, config }
    }

    /// Open a live stream over `conversation_id` bounded to the most recent
    /// `window_size` messages.
    ///
    /// Fails with [`SyncError::Connection`] if the initial subscription
    /// cannot be established; the caller retries with backoff.  Once open,
    /// dropped subscriptions are re-established internally and already
    /// delivered messages are never re-emitted.
    pub async fn open(
        &self,
        conversation_id: ConversationId,
        window_size: usize,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamUpdate>)> {
        let (update_tx, update_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let _ = update_tx.try_send(StreamUpdate::State(StreamState::Subscribing));
        let subscription = self.log.subscribe(conversation_id, window_size).await?;
        let _ = update_tx.try_send(StreamUpdate::State(StreamState::Live));

        info!(conversation = %conversation_id, window_size, "stream opened");

        let task = StreamTask {
            conversation_id,
            window_size,
            log: Arc::clone(&self.log),
            seen: HashSet::new(),
            oldest: None,
            updates: update_tx,
            reconnect: self.config.reconnect,
            cache: self.config.cache.clone(),
        };
        tokio::spawn(task.run(subscription, cmd_rx));

        Ok((
            StreamHandle {
                conversation_id,
                commands: cmd_tx,
            },
            update_rx,
        ))
    }

    /// The log this manager reads from.
    pub fn log(&self) -> &Arc<dyn MessageLog> {
        &self.log
    }
}

/// Handle to one open conversation stream.
///
/// Dropping the handle tears the task down just like an explicit
/// [`close`](Self::close).
#[derive(Clone)]
pub struct StreamHandle {
    conversation_id: ConversationId,
    commands: mpsc::Sender<StreamCommand>,
}

impl StreamHandle {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Fetch the next page strictly older than the oldest message known to
    /// this stream, newest first.
    ///
    /// Tolerates concurrent live deliveries: anything already seen is
    /// filtered out, never re-fetched into the sequence.
    pub async fn load_older(&self) -> Result<OlderPage> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(StreamCommand::LoadOlder(reply_tx))
            .await
            .map_err(|_| SyncError::Closed)?;
        reply_rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Release the subscription.  Idempotent: closing an already-closed
    /// stream is a no-op.
    pub async fn close(&self) {
        let _ = self.commands.send(StreamCommand::Close).await;
    }
}

// ---------------------------------------------------------------------------
// Per-conversation task
// ---------------------------------------------------------------------------

struct StreamTask {
    conversation_id: ConversationId,
    window_size: usize,
    log: Arc<dyn MessageLog>,
    /// Every message id delivered over the stream's lifetime.  Grows
    /// monotonically; anything arriving again via either channel is dropped.
    seen: HashSet<MessageId>,
    /// Minimum position observed across live and paginated messages; the
    /// pagination cursor, so loading always proceeds strictly backward.
    oldest: Option<LogPosition>,
    updates: mpsc::Sender<StreamUpdate>,
    reconnect: RetryPolicy,
    cache: Option<Arc<Mutex<Database>>>,
}

impl StreamTask {
    async fn run(mut self, mut subscription: Subscription, mut cmd_rx: mpsc::Receiver<StreamCommand>) {
        loop {
            tokio::select! {
                // --- Incoming commands ---
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(StreamCommand::LoadOlder(reply)) => {
                            let page = self.load_older().await;
                            let _ = reply.send(page);
                        }
                        Some(StreamCommand::Close) | None => {
                            debug!(conversation = %self.conversation_id, "stream closing");
                            break;
                        }
                    }
                }

                // --- Live snapshots ---
                snapshot = subscription.next_snapshot() => {
                    match snapshot {
                        Some(batch) => {
                            let fresh = self.ingest(batch);
                            if !fresh.is_empty() {
                                debug!(
                                    conversation = %self.conversation_id,
                                    count = fresh.len(),
                                    "live messages delivered"
                                );
                                let _ = self.updates.send(StreamUpdate::Messages(fresh)).await;
                            }
                        }
                        None => {
                            // Subscription dropped: keep rendered state and the
                            // seen set, re-subscribe with backoff.
                            match self.resubscribe(&mut cmd_rx).await {
                                Some(sub) => subscription = sub,
                                None => break,
                            }
                        }
                    }
                }
            }
        }

        let _ = self.updates.send(StreamUpdate::State(StreamState::Closed)).await;
        info!(conversation = %self.conversation_id, "stream closed");
    }

    /// Filter a batch against the seen set, order it newest first, advance
    /// the pagination cursor, and write it through to the local cache.
    fn ingest(&mut self, mut batch: Vec<Message>) -> Vec<Message> {
        batch.retain(|m| self.seen.insert(m.id));
        if batch.is_empty() {
            return batch;
        }

        sort_newest_first(&mut batch);

        let oldest_in_batch = batch.last().expect("batch not empty").position();
        self.oldest = Some(match self.oldest {
            Some(current) => current.min(oldest_in_batch),
            None => oldest_in_batch,
        });

        if let Some(cache) = &self.cache {
            if let Ok(mut db) = cache.lock() {
                if let Err(e) = db.upsert_messages(&batch) {
                    warn!(
                        conversation = %self.conversation_id,
                        error = %e,
                        "cache write-through failed"
                    );
                }
            }
        }

        batch
    }

    async fn load_older(&mut self) -> Result<OlderPage> {
        // Fetch one extra row so has_more is exact even when the page ends
        // right at the log's first message.  The extra row is discarded
        // before ingestion and re-fetched by the next page.
        let mut page = self
            .log
            .query_before(self.conversation_id, self.oldest, self.window_size + 1)
            .await?;

        let has_more = page.len() > self.window_size;
        page.truncate(self.window_size);
        let messages = self.ingest(page);

        debug!(
            conversation = %self.conversation_id,
            count = messages.len(),
            has_more,
            "older page loaded"
        );

        Ok(OlderPage { messages, has_more })
    }

    /// Re-establish the live subscription with capped, jittered backoff.
    /// Returns `None` if the stream is closed while reconnecting.
    async fn resubscribe(
        &mut self,
        cmd_rx: &mut mpsc::Receiver<StreamCommand>,
    ) -> Option<Subscription> {
        let _ = self
            .updates
            .send(StreamUpdate::State(StreamState::Reconnecting))
            .await;
        warn!(conversation = %self.conversation_id, "subscription dropped, reconnecting");

        let mut attempt = 0u32;
        loop {
            match self
                .log
                .subscribe(self.conversation_id, self.window_size)
                .await
            {
                Ok(subscription) => {
                    info!(conversation = %self.conversation_id, attempt, "resubscribed");
                    let _ = self
                        .updates
                        .send(StreamUpdate::State(StreamState::Live))
                        .await;
                    return Some(subscription);
                }
                Err(e) => {
                    let delay = self.reconnect.delay_for(attempt);
                    attempt = attempt.saturating_add(1);
                    debug!(
                        conversation = %self.conversation_id,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "resubscribe failed"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(StreamCommand::LoadOlder(reply)) => {
                                    // Pagination may still work while the live
                                    // channel is down.
                                    let page = self.load_older().await;
                                    let _ = reply.send(page);
                                }
                                Some(StreamCommand::Close) | None => return None,
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMessageLog;
    use chrono::{TimeZone, Utc};
    use courrier_shared::{MessageBody, UserId};
    use std::time::Duration;

    fn text(conversation_id: ConversationId, secs: i64, body: &str) -> Message {
        Message::new(
            conversation_id,
            UserId::new("alice"),
            "Alice".to_string(),
            MessageBody::Text {
                text: body.to_string(),
            },
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    /// Seed m1..m20 (timestamps 1..20) and return the log.
    fn seeded_log(conversation_id: ConversationId) -> Arc<MemoryMessageLog> {
        let log = MemoryMessageLog::new();
        log.seed(
            conversation_id,
            (1..=20)
                .map(|i| text(conversation_id, i, &format!("m{i}")))
                .collect(),
        );
        log
    }

    async fn next_messages(updates: &mut mpsc::Receiver<StreamUpdate>) -> Vec<Message> {
        loop {
            match tokio::time::timeout(Duration::from_secs(1), updates.recv())
                .await
                .expect("timed out waiting for update")
            {
                Some(StreamUpdate::Messages(batch)) => return batch,
                Some(StreamUpdate::State(_)) => continue,
                None => panic!("update channel closed"),
            }
        }
    }

    async fn next_state(updates: &mut mpsc::Receiver<StreamUpdate>) -> StreamState {
        loop {
            match tokio::time::timeout(Duration::from_secs(1), updates.recv())
                .await
                .expect("timed out waiting for update")
            {
                Some(StreamUpdate::State(state)) => return state,
                Some(StreamUpdate::Messages(_)) => continue,
                None => panic!("update channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn open_delivers_recent_window() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(log);

        let (_handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();

        assert_eq!(next_state(&mut updates).await, StreamState::Subscribing);
        assert_eq!(next_state(&mut updates).await, StreamState::Live);

        let window = next_messages(&mut updates).await;
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].timestamp, Utc.timestamp_opt(20, 0).unwrap());
        assert_eq!(window[9].timestamp, Utc.timestamp_opt(11, 0).unwrap());
    }

    #[tokio::test]
    async fn load_older_pages_backward_to_the_start() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(log);

        let (handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();
        let window = next_messages(&mut updates).await;
        assert_eq!(window.len(), 10);

        let page = handle.load_older().await.unwrap();
        assert_eq!(page.messages.len(), 10);
        assert_eq!(
            page.messages[0].timestamp,
            Utc.timestamp_opt(10, 0).unwrap()
        );
        assert_eq!(page.messages[9].timestamp, Utc.timestamp_opt(1, 0).unwrap());
        // The page ends exactly at the oldest message in the log.
        assert!(!page.has_more);

        let end = handle.load_older().await.unwrap();
        assert!(end.messages.is_empty());
        assert!(!end.has_more);
    }

    #[tokio::test]
    async fn live_arrival_is_not_resurfaced_by_pagination() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(Arc::clone(&log) as Arc<dyn MessageLog>);

        let (handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();
        let _ = next_messages(&mut updates).await;

        // m21 arrives on the live channel.
        log.append(conversation_id, text(conversation_id, 0, "m21"))
            .await
            .unwrap();
        let live = next_messages(&mut updates).await;
        assert_eq!(live.len(), 1);

        // Pagination never re-surfaces it, and never duplicates the window.
        let mut all_ids: Vec<MessageId> = Vec::new();
        let page = handle.load_older().await.unwrap();
        all_ids.extend(page.messages.iter().map(|m| m.id));
        assert!(!all_ids.contains(&live[0].id));
        assert_eq!(page.messages.len(), 10);
    }

    #[tokio::test]
    async fn no_duplicates_across_any_interleaving() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(Arc::clone(&log) as Arc<dyn MessageLog>);

        let (handle, mut updates) = manager.open(conversation_id, 5).await.unwrap();

        let mut observed: Vec<MessageId> = Vec::new();
        observed.extend(next_messages(&mut updates).await.iter().map(|m| m.id));

        // Interleave pagination with live appends.
        for round in 0..3 {
            log.append(conversation_id, text(conversation_id, 0, &format!("live{round}")))
                .await
                .unwrap();
            let page = handle.load_older().await.unwrap();
            observed.extend(page.messages.iter().map(|m| m.id));
            observed.extend(next_messages(&mut updates).await.iter().map(|m| m.id));
        }

        let unique: HashSet<MessageId> = observed.iter().copied().collect();
        assert_eq!(unique.len(), observed.len(), "duplicate message surfaced");
    }

    #[tokio::test]
    async fn reconnect_preserves_seen_set() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(Arc::clone(&log) as Arc<dyn MessageLog>);

        let (_handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();
        let first = next_messages(&mut updates).await;
        assert_eq!(first.len(), 10);

        log.disconnect(conversation_id);
        assert_eq!(next_state(&mut updates).await, StreamState::Reconnecting);
        assert_eq!(next_state(&mut updates).await, StreamState::Live);

        // The resubscribe snapshot redelivers the same window; nothing new
        // may surface.  A genuinely new message still comes through.
        log.append(conversation_id, text(conversation_id, 0, "after"))
            .await
            .unwrap();
        let after = next_messages(&mut updates).await;
        assert_eq!(after.len(), 1);
        assert!(matches!(&after[0].body, MessageBody::Text { text } if text == "after"));
    }

    #[tokio::test]
    async fn open_fails_when_subscription_refused() {
        let conversation_id = ConversationId::new();
        let log = MemoryMessageLog::new();
        log.fail_next_subscribe();
        let manager = StreamManager::new(Arc::clone(&log) as Arc<dyn MessageLog>);

        let result = manager.open(conversation_id, 10).await;
        assert!(matches!(result, Err(SyncError::Connection(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_the_stream() {
        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let manager = StreamManager::new(log);

        let (handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();
        let _ = next_messages(&mut updates).await;

        handle.close().await;
        handle.close().await;

        loop {
            match next_state(&mut updates).await {
                StreamState::Closed => break,
                _ => continue,
            }
        }
        assert!(matches!(
            handle.load_older().await,
            Err(SyncError::Closed)
        ));
    }

    #[tokio::test]
    async fn cache_write_through_persists_batches() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("cache.db")).unwrap();
        let cache = Arc::new(Mutex::new(db));

        let conversation_id = ConversationId::new();
        let log = seeded_log(conversation_id);
        let config = StreamConfig {
            cache: Some(Arc::clone(&cache)),
            ..StreamConfig::default()
        };
        let manager = StreamManager::with_config(Arc::clone(&log) as Arc<dyn MessageLog>, config);

        let (_handle, mut updates) = manager.open(conversation_id, 10).await.unwrap();
        let window = next_messages(&mut updates).await;
        assert_eq!(window.len(), 10);

        let cached = cache
            .lock()
            .unwrap()
            .messages_for_conversation(conversation_id, 50, None)
            .unwrap();
        assert_eq!(cached.len(), 10);
    }
}
