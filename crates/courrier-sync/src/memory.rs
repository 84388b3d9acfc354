//! In-memory [`MessageLog`] implementation.
//!
//! Backs tests and local development.  Mirrors the remote store's contract:
//! server-assigned monotonically non-decreasing timestamps, snapshot
//! delivery to live subscribers on every mutation, and atomic read-receipt
//! batches.  A handful of failure hooks let tests exercise the transient
//! error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use courrier_shared::constants::CHANNEL_CAPACITY;
use courrier_shared::cursor::sort_newest_first;
use courrier_shared::{ConversationId, LogPosition, Message};

use crate::error::{Result, SyncError};
use crate::log::{MessageLog, ReadReceipt, Subscription};

struct Subscriber {
    limit: usize,
    sender: mpsc::Sender<Vec<Message>>,
}

#[derive(Default)]
struct Inner {
    logs: HashMap<ConversationId, Vec<Message>>,
    subscribers: HashMap<ConversationId, Vec<Subscriber>>,
}

/// In-process message log with live snapshot fanout.
#[derive(Default)]
pub struct MemoryMessageLog {
    inner: Mutex<Inner>,
    fail_next_subscribe: AtomicBool,
    fail_next_receipts: AtomicBool,
    receipt_batches: AtomicUsize,
}

impl MemoryMessageLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Load fixture messages as-is, without notifying subscribers.
    pub fn seed(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        inner.logs.entry(conversation_id).or_default().extend(messages);
    }

    /// Make the next `subscribe` call fail with a connection error.
    pub fn fail_next_subscribe(&self) {
        self.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    /// Make the next read-receipt batch fail with a write conflict.
    pub fn fail_next_receipts(&self) {
        self.fail_next_receipts.store(true, Ordering::SeqCst);
    }

    /// Number of read-receipt batches applied so far.
    pub fn receipt_batches(&self) -> usize {
        self.receipt_batches.load(Ordering::SeqCst)
    }

    /// Drop every live subscription on a conversation, as a network fault
    /// would.
    pub fn disconnect(&self, conversation_id: ConversationId) {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        inner.subscribers.remove(&conversation_id);
    }

    /// Current snapshot of a conversation's full log, newest first.
    pub fn messages(&self, conversation_id: ConversationId) -> Vec<Message> {
        let inner = self.inner.lock().expect("log lock poisoned");
        let mut messages = inner
            .logs
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut messages);
        messages
    }

    /// Push the latest window to every live subscriber of `conversation_id`.
    fn notify(inner: &mut Inner, conversation_id: ConversationId) {
        let mut messages = inner
            .logs
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut messages);

        if let Some(subscribers) = inner.subscribers.get_mut(&conversation_id) {
            subscribers.retain(|sub| {
                let window: Vec<Message> = messages.iter().take(sub.limit).cloned().collect();
                sub.sender.try_send(window).is_ok()
            });
        }
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    async fn subscribe(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Subscription> {
        if self.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(SyncError::Connection("subscribe refused".to_string()));
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        let mut inner = self.inner.lock().expect("log lock poisoned");
        inner
            .subscribers
            .entry(conversation_id)
            .or_default()
            .push(Subscriber {
                limit,
                sender: sender.clone(),
            });

        // Initial snapshot, like a remote store's first delivery.
        let mut messages = inner
            .logs
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut messages);
        let window: Vec<Message> = messages.into_iter().take(limit).collect();
        let _ = sender.try_send(window);

        debug!(conversation = %conversation_id, limit, "live subscription established");
        Ok(Subscription::new(receiver))
    }

    async fn query_before(
        &self,
        conversation_id: ConversationId,
        before: Option<LogPosition>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let inner = self.inner.lock().expect("log lock poisoned");
        let mut messages = inner
            .logs
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        drop(inner);

        sort_newest_first(&mut messages);
        let page: Vec<Message> = messages
            .into_iter()
            .filter(|m| match before {
                Some(cursor) => m.position() < cursor,
                None => true,
            })
            .take(limit)
            .collect();
        Ok(page)
    }

    async fn apply_read_receipts(
        &self,
        conversation_id: ConversationId,
        receipts: &[ReadReceipt],
    ) -> Result<()> {
        if self.fail_next_receipts.swap(false, Ordering::SeqCst) {
            return Err(SyncError::WriteConflict("simulated conflict".to_string()));
        }
        if receipts.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.lock().expect("log lock poisoned");
        let log = inner.logs.entry(conversation_id).or_default();
        for receipt in receipts {
            if let Some(message) = log.iter_mut().find(|m| m.id == receipt.message_id) {
                message.read_by.insert(receipt.reader.clone());
            }
        }
        self.receipt_batches.fetch_add(1, Ordering::SeqCst);

        Self::notify(&mut inner, conversation_id);
        Ok(())
    }

    async fn append(&self, conversation_id: ConversationId, mut message: Message) -> Result<Message> {
        let mut inner = self.inner.lock().expect("log lock poisoned");
        let log = inner.logs.entry(conversation_id).or_default();

        // Server-assigned timestamp, never going backwards.
        let mut ts = Utc::now();
        if let Some(last) = log.iter().map(|m| m.timestamp).max() {
            ts = ts.max(last);
        }
        message.timestamp = ts;
        message.conversation_id = conversation_id;
        log.push(message.clone());

        Self::notify(&mut inner, conversation_id);
        Ok(message)
    }
}
