//! Read-receipt reconciliation.
//!
//! Marks rendered messages as read by the current viewer, batched into a
//! single atomic store update.  The operation is additive-only set union,
//! so it is idempotent and commutes across this user's devices — retries
//! and races never lose information.

use std::sync::Arc;

use tracing::{debug, warn};

use courrier_shared::{ConversationId, Message, UserId};

use crate::log::{MessageLog, ReadReceipt};

/// Applies idempotent read-state transitions for newly observed messages.
pub struct ReadReceiptReconciler {
    log: Arc<dyn MessageLog>,
}

impl ReadReceiptReconciler {
    pub fn new(log: Arc<dyn MessageLog>) -> Self {
        Self { log }
    }

    /// Mark every message in `messages` that the viewer has not yet read —
    /// and did not send — as read by `viewer`, in one batch write.
    ///
    /// Returns the number of messages updated; `0` means the post-condition
    /// already held and no write was issued.  Transient failures are logged
    /// and swallowed: the same batch is re-filtered on the next render pass
    /// and retrying is safe.
    pub async fn reconcile(
        &self,
        viewer: &UserId,
        conversation_id: ConversationId,
        messages: &[Message],
    ) -> usize {
        let receipts: Vec<ReadReceipt> = messages
            .iter()
            .filter(|m| m.sender_id != *viewer && !m.read_by.contains(viewer))
            .map(|m| ReadReceipt {
                message_id: m.id,
                reader: viewer.clone(),
            })
            .collect();

        if receipts.is_empty() {
            return 0;
        }

        match self
            .log
            .apply_read_receipts(conversation_id, &receipts)
            .await
        {
            Ok(()) => {
                debug!(
                    conversation = %conversation_id,
                    viewer = %viewer,
                    count = receipts.len(),
                    "read receipts applied"
                );
                receipts.len()
            }
            Err(e) => {
                // Not user-visible; the next render pass retries the batch.
                warn!(
                    conversation = %conversation_id,
                    viewer = %viewer,
                    error = %e,
                    "read receipt batch failed"
                );
                0
            }
        }
    }
}
