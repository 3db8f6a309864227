//! Debounced aggregation of read receipts.
//!
//! The view marks messages as read while the user scrolls; the batcher
//! collects their ids in a set and sends them in one request per debounce
//! interval. The pending set is shared between the marking side and the
//! flush task, and each flush swaps it out under the lock so an id is sent
//! at most once. A failed flush is logged and not retried.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use matchchat_proto::message::{ConversationId, MessageId};

use crate::api::ChatApi;
use crate::config::ReceiptConfig;

/// Batches read receipts for one open conversation.
pub struct ReadReceiptBatcher<A: ChatApi> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    api: Arc<A>,
    conversation: ConversationId,
    config: ReceiptConfig,
    pending: Mutex<HashSet<MessageId>>,
    flush_scheduled: AtomicBool,
    opened_at: Instant,
}

impl<A: ChatApi> ReadReceiptBatcher<A> {
    /// Creates a batcher; the suppression window starts now.
    pub fn new(api: Arc<A>, conversation: ConversationId, config: ReceiptConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                conversation,
                config,
                pending: Mutex::new(HashSet::new()),
                flush_scheduled: AtomicBool::new(false),
                opened_at: Instant::now(),
            }),
        }
    }

    /// Whether marks are still being ignored after the view opened.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.inner.opened_at.elapsed() < self.inner.config.initial_suppression
    }

    /// Adds one id to the pending set and schedules a flush if none is.
    ///
    /// Returns `false` if the mark was suppressed or already pending.
    pub fn mark_read(&self, id: MessageId) -> bool {
        if self.is_suppressed() {
            return false;
        }
        let added = self.inner.pending.lock().insert(id);
        if added {
            self.schedule_flush();
        }
        added
    }

    /// Marks the ids of one scroll event, at most `max_per_scroll` of them.
    ///
    /// Returns how many ids were newly added.
    pub fn mark_many(&self, ids: impl IntoIterator<Item = MessageId>) -> usize {
        if self.is_suppressed() {
            return 0;
        }
        let added = {
            let mut pending = self.inner.pending.lock();
            ids.into_iter()
                .take(self.inner.config.max_per_scroll)
                .filter(|id| pending.insert(*id))
                .count()
        };
        if added > 0 {
            self.schedule_flush();
        }
        added
    }

    /// Number of ids waiting for the next flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Sends every pending id now. Returns how many were sent.
    pub async fn flush(&self) -> usize {
        self.inner.flush().await
    }

    fn schedule_flush(&self) {
        if self
            .inner
            .flush_scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.flush_interval).await;
            inner.flush().await;
        });
    }
}

impl<A: ChatApi> Inner<A> {
    async fn flush(&self) -> usize {
        // Cleared before the swap so marks racing with this flush schedule
        // the next one.
        self.flush_scheduled.store(false, Ordering::Release);
        let mut ids: Vec<MessageId> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect();
        if ids.is_empty() {
            return 0;
        }
        ids.sort_unstable();

        match self.api.mark_messages_read(self.conversation, &ids).await {
            Ok(()) => tracing::debug!(
                conversation = %self.conversation,
                count = ids.len(),
                "read receipts sent"
            ),
            Err(e) => tracing::warn!(
                conversation = %self.conversation,
                count = ids.len(),
                error = %e,
                "read receipts dropped"
            ),
        }
        ids.len()
    }
}
