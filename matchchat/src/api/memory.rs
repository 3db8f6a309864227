//! In-process implementation of [`ChatApi`] for tests.
//!
//! Holds conversations, summaries and candidate profiles in memory and
//! records every mutating call so tests can assert on what the engine sent.
//! Failures and latency can be injected per instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use url::Url;

use matchchat_proto::message::{ConversationId, ConversationSummary, Message, MessageId, UserId};
use matchchat_proto::profile::{CandidateProfile, SearchFilter};
use matchchat_proto::rest::{SendMessageRequest, SessionToken, Status, SwipeAction};

use super::{ApiError, ChatApi};

/// A recorded history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchCall {
    /// `latest_messages(conversation, limit)`
    Latest(ConversationId, usize),
    /// `messages_before(conversation, id, limit)`
    Before(ConversationId, MessageId, usize),
    /// `messages_after(conversation, id, limit)`
    After(ConversationId, MessageId, usize),
}

#[derive(Default)]
struct Recorded {
    fetches: Vec<FetchCall>,
    read_batches: Vec<(ConversationId, Vec<MessageId>)>,
    conversation_reads: Vec<ConversationId>,
    swipes: Vec<(UserId, SwipeAction)>,
    searches: Vec<Option<UserId>>,
}

/// In-memory backend.
pub struct InMemoryApi {
    local_user: UserId,
    base_url: Url,
    messages: Mutex<HashMap<ConversationId, Vec<Message>>>,
    summaries: Mutex<Vec<ConversationSummary>>,
    candidates: Mutex<Vec<CandidateProfile>>,
    recorded: Mutex<Recorded>,
    next_message_id: AtomicI64,
    sessions: AtomicUsize,
    failing: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    logged_in: AtomicBool,
}

impl InMemoryApi {
    /// Creates an empty backend for `local_user`.
    ///
    /// `base_url` only matters for deriving the chat socket URL.
    #[must_use]
    pub fn new(local_user: UserId, base_url: Url) -> Self {
        Self {
            local_user,
            base_url,
            messages: Mutex::new(HashMap::new()),
            summaries: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            recorded: Mutex::new(Recorded::default()),
            next_message_id: AtomicI64::new(1),
            sessions: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            fetch_delay: Mutex::new(None),
            logged_in: AtomicBool::new(true),
        }
    }

    /// Seeds a conversation with messages `1..=count` alternating between
    /// `peer` and the local user, and registers its summary.
    pub fn seed_conversation(&self, conversation: ConversationId, peer: UserId, count: i64) {
        let mut history = Vec::new();
        for raw in 1..=count {
            let (sender, receiver) = if raw % 2 == 0 {
                (self.local_user, peer)
            } else {
                (peer, self.local_user)
            };
            history.push(Message {
                id: MessageId::new(raw),
                conversation_id: conversation,
                sender_id: sender,
                receiver_id: receiver,
                content: format!("message {raw}"),
                is_read: false,
                created_at: Some(Utc::now()),
                is_mine: false,
            });
        }
        let last = history.last().cloned();
        self.messages.lock().insert(conversation, history);
        self.next_message_id
            .fetch_max(count.saturating_add(1), Ordering::SeqCst);
        self.summaries.lock().push(ConversationSummary {
            id: conversation,
            user1: self.local_user,
            user2: peer,
            last_message: last.as_ref().map(|m| m.content.clone()).unwrap_or_default(),
            last_message_time: last.as_ref().and_then(|m| m.created_at),
            last_message_sender: last.map(|m| m.sender_id),
            is_read: false,
        });
    }

    /// Appends a message from `sender` to an existing conversation and
    /// returns it, as if another client had posted it.
    pub fn push_message(&self, conversation: ConversationId, sender: UserId, content: &str) -> Message {
        let id = MessageId::new(self.next_message_id.fetch_add(1, Ordering::SeqCst));
        let receiver = if sender == self.local_user {
            UserId::new(0)
        } else {
            self.local_user
        };
        let message = Message {
            id,
            conversation_id: conversation,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            is_read: false,
            created_at: Some(Utc::now()),
            is_mine: false,
        };
        self.messages
            .lock()
            .entry(conversation)
            .or_default()
            .push(message.clone());
        message
    }

    /// Registers swipe candidates with ids `first..first + count`.
    pub fn seed_candidates(&self, first: i64, count: i64) {
        let mut candidates = self.candidates.lock();
        for raw in first..first + count {
            candidates.push(CandidateProfile {
                id: UserId::new(raw),
                display_name: Some(format!("user {raw}")),
                age: None,
                location: None,
                bio: None,
            });
        }
    }

    /// Makes every call fail with [`ApiError::Network`] while `true`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every history fetch by `delay` (for interleaving tests).
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.fetch_delay.lock() = delay;
    }

    /// History fetches issued so far.
    #[must_use]
    pub fn fetches(&self) -> Vec<FetchCall> {
        self.recorded.lock().fetches.clone()
    }

    /// `mark_messages_read` batches issued so far.
    #[must_use]
    pub fn read_batches(&self) -> Vec<(ConversationId, Vec<MessageId>)> {
        self.recorded.lock().read_batches.clone()
    }

    /// `mark_conversation_read` calls issued so far.
    #[must_use]
    pub fn conversation_reads(&self) -> Vec<ConversationId> {
        self.recorded.lock().conversation_reads.clone()
    }

    /// Swipe decisions issued so far.
    #[must_use]
    pub fn swipes(&self) -> Vec<(UserId, SwipeAction)> {
        self.recorded.lock().swipes.clone()
    }

    /// `last_seen` cursors of the candidate searches issued so far.
    #[must_use]
    pub fn searches(&self) -> Vec<Option<UserId>> {
        self.recorded.lock().searches.clone()
    }

    /// Number of session tokens handed out.
    #[must_use]
    pub fn sessions_started(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), ApiError> {
        if !self.logged_in.load(Ordering::SeqCst) {
            return Err(ApiError::NotAuthenticated);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ApiError::Network("injected failure".into()));
        }
        Ok(())
    }

    async fn fetch<F>(&self, call: FetchCall, select: F) -> Result<Vec<Message>, ApiError>
    where
        F: FnOnce(&[Message]) -> Vec<Message> + Send,
    {
        self.recorded.lock().fetches.push(call);
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        let conversation = match call {
            FetchCall::Latest(c, _) | FetchCall::Before(c, _, _) | FetchCall::After(c, _, _) => c,
        };
        let page = {
            let messages = self.messages.lock();
            messages
                .get(&conversation)
                .map(|history| select(history))
                .unwrap_or_default()
        };
        Ok(page)
    }
}

impl ChatApi for InMemoryApi {
    fn local_user(&self) -> UserId {
        self.local_user
    }

    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn start_session(&self) -> Result<SessionToken, ApiError> {
        self.check()?;
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionToken {
            session_token: format!("session-{n}"),
        })
    }

    async fn latest_messages(
        &self,
        conversation: ConversationId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch(FetchCall::Latest(conversation, limit), |history| {
            let start = history.len().saturating_sub(limit);
            history[start..].to_vec()
        })
        .await
    }

    async fn messages_before(
        &self,
        conversation: ConversationId,
        before: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch(FetchCall::Before(conversation, before, limit), |history| {
            let older: Vec<Message> = history.iter().filter(|m| m.id < before).cloned().collect();
            let start = older.len().saturating_sub(limit);
            older[start..].to_vec()
        })
        .await
    }

    async fn messages_after(
        &self,
        conversation: ConversationId,
        after: MessageId,
        limit: usize,
    ) -> Result<Vec<Message>, ApiError> {
        self.fetch(FetchCall::After(conversation, after, limit), |history| {
            history
                .iter()
                .filter(|m| m.id > after)
                .take(limit)
                .cloned()
                .collect()
        })
        .await
    }

    async fn mark_messages_read(
        &self,
        conversation: ConversationId,
        ids: &[MessageId],
    ) -> Result<(), ApiError> {
        self.recorded
            .lock()
            .read_batches
            .push((conversation, ids.to_vec()));
        self.check()?;
        if let Some(history) = self.messages.lock().get_mut(&conversation) {
            for message in history.iter_mut().filter(|m| ids.contains(&m.id)) {
                message.is_read = true;
            }
        }
        Ok(())
    }

    async fn mark_conversation_read(&self, conversation: ConversationId) -> Result<(), ApiError> {
        self.recorded.lock().conversation_reads.push(conversation);
        self.check()
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ApiError> {
        self.check()?;
        let mut message = self.push_message(request.chat_id, request.sender_id, &request.content);
        message.receiver_id = request.receiver_id;
        message.mark_ownership(self.local_user);
        Ok(message)
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>, ApiError> {
        self.check()?;
        Ok(self.summaries.lock().clone())
    }

    async fn search_candidates(
        &self,
        _filter: &SearchFilter,
        last_seen: Option<UserId>,
        page_size: usize,
    ) -> Result<Vec<CandidateProfile>, ApiError> {
        self.recorded.lock().searches.push(last_seen);
        self.check()?;
        let candidates = self.candidates.lock();
        Ok(candidates
            .iter()
            .filter(|c| last_seen.is_none_or(|last| c.id > last))
            .take(page_size)
            .cloned()
            .collect())
    }

    async fn swipe(&self, target: UserId, action: SwipeAction) -> Result<Status, ApiError> {
        self.recorded.lock().swipes.push((target, action));
        self.check()?;
        Ok(Status {
            status: "ok".into(),
            content: None,
        })
    }

    fn clear_credentials(&self) {
        self.logged_in.store(false, Ordering::SeqCst);
    }
}
