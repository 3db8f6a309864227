//! Bounded, ordered, de-duplicated view of one conversation.
//!
//! The window keeps three id-ordered maps:
//!
//! ```text
//!   staged_older  │        visible (≤ max_size)        │  staged_newer
//!   fetched, not  │  what the view renders, ascending  │  fetched or evicted,
//!   yet spliced   │                                    │  not yet spliced
//! ```
//!
//! Fetching and splicing are separate steps: `load_older` / `load_newer`
//! only stage a page, and the view decides when to splice it in so it can
//! keep its scroll anchor. Splicing past `max_size` evicts from the
//! opposite end and re-stages what it evicted, clearing the reached flag on
//! that side so the evicted range can be fetched again.
//!
//! Identifier order is authoritative: live messages and fetched pages may
//! arrive in any order relative to each other, and the maps sort them.
//!
//! [`MessageWindow`] is the synchronous state machine;
//! [`WindowedMessageBuffer`] drives it with REST calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use matchchat_proto::message::{ConversationId, Message, MessageId, SummaryUpdate, UserId};

use crate::api::{ApiError, ChatApi};
use crate::config::WindowConfig;

/// Errors returned by window operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    /// No conversation has been loaded into the window.
    #[error("no conversation loaded")]
    NotLoaded,

    /// The conversation is not in the chat list.
    #[error("unknown conversation {0}")]
    UnknownConversation(ConversationId),

    /// Refused to send a message with no text.
    #[error("message is empty")]
    EmptyMessage,

    /// The REST call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// End of the window an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards the beginning of the conversation.
    Older,
    /// Towards the live end of the conversation.
    Newer,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Older => write!(f, "older"),
            Self::Newer => write!(f, "newer"),
        }
    }
}

/// Result of [`MessageWindow::splice`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceOutcome {
    /// Messages that entered the visible window.
    pub inserted: usize,
    /// Messages evicted from the opposite end and re-staged.
    pub evicted: usize,
}

/// Result of admitting a single live or sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Added to the visible window.
    Inserted,
    /// Added behind an unspliced newer batch; becomes visible with it.
    Staged,
    /// Already present; nothing changed.
    Duplicate,
    /// The window is scrolled away from the live end; the message will be
    /// fetched with the newer pages instead.
    Deferred,
    /// Belongs to another conversation.
    Foreign,
}

/// Result of a pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No request was made (boundary reached, request in flight, staged
    /// batch already full, nothing to anchor on) or the result arrived for
    /// a stale window and was dropped.
    Skipped,
    /// A page was fetched.
    Fetched {
        /// Messages added to the staging batch.
        staged: usize,
        /// Whether the page was short, so the boundary is now reached.
        reached_boundary: bool,
    },
}

/// Claim on one in-flight pagination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    conversation: ConversationId,
    direction: Direction,
    anchor: MessageId,
}

impl FetchTicket {
    /// Conversation to fetch from.
    #[must_use]
    pub const fn conversation(&self) -> ConversationId {
        self.conversation
    }

    /// Which side to fetch.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Exclusive bound of the fetch.
    #[must_use]
    pub const fn anchor(&self) -> MessageId {
        self.anchor
    }
}

/// Synchronous window state.
#[derive(Debug)]
pub struct MessageWindow {
    config: WindowConfig,
    local_user: UserId,
    conversation: Option<ConversationId>,
    visible: BTreeMap<MessageId, Message>,
    staged_older: BTreeMap<MessageId, Message>,
    staged_newer: BTreeMap<MessageId, Message>,
    oldest_seen: Option<MessageId>,
    newest_seen: Option<MessageId>,
    reached_oldest: bool,
    reached_newest: bool,
    loading_older: bool,
    loading_newer: bool,
    generation: u64,
}

impl MessageWindow {
    /// Creates an empty window with no conversation.
    #[must_use]
    pub const fn new(config: WindowConfig, local_user: UserId) -> Self {
        Self {
            config,
            local_user,
            conversation: None,
            visible: BTreeMap::new(),
            staged_older: BTreeMap::new(),
            staged_newer: BTreeMap::new(),
            oldest_seen: None,
            newest_seen: None,
            reached_oldest: false,
            reached_newest: false,
            loading_older: false,
            loading_newer: false,
            generation: 0,
        }
    }

    /// Empties the window and points it at `conversation`.
    ///
    /// Returns the new generation; results of fetches started under an
    /// older generation are discarded.
    pub fn reset(&mut self, conversation: ConversationId) -> u64 {
        self.clear();
        self.conversation = Some(conversation);
        self.reached_newest = true;
        self.generation
    }

    /// Drops every message and forgets the conversation.
    pub fn clear(&mut self) {
        self.conversation = None;
        self.visible.clear();
        self.staged_older.clear();
        self.staged_newer.clear();
        self.oldest_seen = None;
        self.newest_seen = None;
        self.reached_oldest = false;
        self.reached_newest = false;
        self.loading_older = false;
        self.loading_newer = false;
        self.generation += 1;
    }

    /// Installs the initial page: the most recent `initial_visible` messages
    /// become visible and the rest are staged as older. A page shorter than
    /// `initial_fetch` means the conversation start has been reached.
    ///
    /// Returns the number of visible messages.
    pub fn seed(&mut self, mut page: Vec<Message>) -> usize {
        page.retain(|m| Some(m.conversation_id) == self.conversation);
        page.sort_by_key(|m| m.id);
        page.dedup_by_key(|m| m.id);
        if page.len() < self.config.initial_fetch {
            self.reached_oldest = true;
        }

        let split = page.len().saturating_sub(self.config.initial_visible);
        let recent = page.split_off(split);
        for message in page {
            self.stage(Direction::Older, message);
        }
        for mut message in recent {
            self.note_seen(message.id);
            message.mark_ownership(self.local_user);
            self.staged_older.remove(&message.id);
            self.visible.insert(message.id, message);
        }
        self.evict(Direction::Newer);
        self.visible.len()
    }

    /// Claims the right to fetch a page in `direction`.
    ///
    /// Returns `None` (no request should be made) when the boundary is
    /// reached, a request for that side is already in flight, more than one
    /// page is already staged on that side, or the window holds nothing to
    /// anchor on.
    ///
    /// # Errors
    ///
    /// [`WindowError::NotLoaded`] if no conversation is loaded.
    pub fn begin_fetch(&mut self, direction: Direction) -> Result<Option<FetchTicket>, WindowError> {
        let conversation = self.conversation.ok_or(WindowError::NotLoaded)?;
        if self.reached(direction) || self.is_loading(direction) {
            return Ok(None);
        }
        if self.staged_len(direction) > self.config.page_size {
            tracing::trace!(%direction, "staged batch full, splice before fetching more");
            return Ok(None);
        }
        let Some(anchor) = self.anchor(direction) else {
            return Ok(None);
        };
        self.set_loading(direction, true);
        Ok(Some(FetchTicket {
            generation: self.generation,
            conversation,
            direction,
            anchor,
        }))
    }

    /// Applies the result of the request claimed by `ticket`.
    ///
    /// Messages on the wrong side of the anchor or already present are
    /// skipped. A page shorter than `page_size` sets the reached flag,
    /// except on the newer side while a live id beyond everything held is
    /// still missing: the page was cut before that message was committed,
    /// so the next fetch must pick it up.
    ///
    /// # Errors
    ///
    /// Propagates the request error after releasing the in-flight guard.
    pub fn finish_fetch(
        &mut self,
        ticket: &FetchTicket,
        result: Result<Vec<Message>, ApiError>,
    ) -> Result<LoadOutcome, WindowError> {
        if ticket.generation != self.generation {
            tracing::debug!(direction = %ticket.direction, "page for a reloaded window dropped");
            return Ok(LoadOutcome::Skipped);
        }
        let direction = ticket.direction;
        self.set_loading(direction, false);
        let page = result?;

        if self.anchor(direction) != Some(ticket.anchor) {
            tracing::debug!(direction = %direction, "window edge moved during fetch, page dropped");
            return Ok(LoadOutcome::Skipped);
        }

        let short = page.len() < self.config.page_size;
        let mut staged = 0;
        for message in page {
            let in_range = match direction {
                Direction::Older => message.id < ticket.anchor,
                Direction::Newer => message.id > ticket.anchor,
            };
            if in_range && Some(message.conversation_id) == self.conversation && !self.contains(message.id) {
                self.stage(direction, message);
                staged += 1;
            }
        }
        let missing_live = direction == Direction::Newer
            && self.newest_seen > self.anchor(Direction::Newer);
        if short && missing_live {
            tracing::debug!(newest_seen = ?self.newest_seen, "short newer page behind a live message");
        }
        let reached_boundary = short && !missing_live;
        if reached_boundary {
            self.set_reached(direction, true);
        }
        Ok(LoadOutcome::Fetched {
            staged,
            reached_boundary,
        })
    }

    /// Merges the staged batch of `direction` into the visible window.
    ///
    /// Ids already visible are skipped. If the window then exceeds
    /// `max_size`, at least one page (and at least the overflow) is evicted
    /// from the opposite end and becomes that side's staged batch.
    pub fn splice(&mut self, direction: Direction) -> SpliceOutcome {
        let batch = match direction {
            Direction::Older => std::mem::take(&mut self.staged_older),
            Direction::Newer => std::mem::take(&mut self.staged_newer),
        };
        let mut inserted = 0;
        for (id, message) in batch {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.visible.entry(id) {
                slot.insert(message);
                inserted += 1;
            }
        }
        let evicted = self.evict(direction);
        SpliceOutcome { inserted, evicted }
    }

    /// Admits one live or just-sent message at the live end.
    pub fn admit(&mut self, mut message: Message) -> Admission {
        if self.conversation != Some(message.conversation_id) {
            return Admission::Foreign;
        }
        if self.contains(message.id) {
            return Admission::Duplicate;
        }
        self.note_seen(message.id);
        if !self.reached_newest {
            return Admission::Deferred;
        }
        message.mark_ownership(self.local_user);
        if !self.staged_newer.is_empty() {
            self.staged_newer.insert(message.id, message);
            return Admission::Staged;
        }
        self.visible.insert(message.id, message);
        self.evict(Direction::Newer);
        Admission::Inserted
    }

    /// Marks peer messages at visible positions `first..=last` as read,
    /// at most `cap` of them counting back from `last`.
    ///
    /// Returns the ids whose read flag changed.
    pub fn mark_visible_read(&mut self, first: usize, last: usize, cap: usize) -> Vec<MessageId> {
        if self.visible.is_empty() || first > last {
            return Vec::new();
        }
        let last = last.min(self.visible.len() - 1);
        let first = first.max((last + 1).saturating_sub(cap));
        if first > last {
            return Vec::new();
        }
        self.visible
            .values_mut()
            .skip(first)
            .take(last - first + 1)
            .filter(|m| !m.is_mine && !m.is_read)
            .map(|m| {
                m.is_read = true;
                m.id
            })
            .collect()
    }

    /// Summary handoff for the chat list, from the last visible message.
    #[must_use]
    pub fn closing_summary(&self) -> Option<SummaryUpdate> {
        let conversation = self.conversation?;
        let (_, last) = self.visible.last_key_value()?;
        Some(SummaryUpdate {
            conversation_id: conversation,
            last_message: last.content.clone(),
            last_message_time: last.created_at,
            last_message_sender: last.sender_id,
            is_read: true,
        })
    }

    /// Copy of the visible messages, ascending.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.visible.values().cloned().collect()
    }

    /// Ids of the visible messages, ascending.
    #[must_use]
    pub fn ids(&self) -> Vec<MessageId> {
        self.visible.keys().copied().collect()
    }

    /// Ids staged on one side, ascending.
    #[must_use]
    pub fn staged_ids(&self, direction: Direction) -> Vec<MessageId> {
        match direction {
            Direction::Older => self.staged_older.keys().copied().collect(),
            Direction::Newer => self.staged_newer.keys().copied().collect(),
        }
    }

    /// Number of visible messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether nothing is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Loaded conversation.
    #[must_use]
    pub const fn conversation(&self) -> Option<ConversationId> {
        self.conversation
    }

    /// Current generation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the start of the conversation has been observed.
    #[must_use]
    pub const fn reached_oldest(&self) -> bool {
        self.reached_oldest
    }

    /// Whether the live end of the conversation has been observed.
    #[must_use]
    pub const fn reached_newest(&self) -> bool {
        self.reached_newest
    }

    /// Oldest id observed in this generation.
    #[must_use]
    pub const fn oldest_seen(&self) -> Option<MessageId> {
        self.oldest_seen
    }

    /// Newest id observed in this generation.
    #[must_use]
    pub const fn newest_seen(&self) -> Option<MessageId> {
        self.newest_seen
    }

    /// Whether the window shows the start of the conversation.
    #[must_use]
    pub fn is_at_oldest(&self) -> bool {
        self.reached_oldest && self.staged_older.is_empty()
    }

    /// Whether the window shows the live end of the conversation.
    #[must_use]
    pub fn is_at_newest(&self) -> bool {
        self.reached_newest && self.staged_newer.is_empty()
    }

    /// Whether a request for `direction` is in flight.
    #[must_use]
    pub const fn is_loading(&self, direction: Direction) -> bool {
        match direction {
            Direction::Older => self.loading_older,
            Direction::Newer => self.loading_newer,
        }
    }

    const fn reached(&self, direction: Direction) -> bool {
        match direction {
            Direction::Older => self.reached_oldest,
            Direction::Newer => self.reached_newest,
        }
    }

    const fn set_reached(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Older => self.reached_oldest = value,
            Direction::Newer => self.reached_newest = value,
        }
    }

    const fn set_loading(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Older => self.loading_older = value,
            Direction::Newer => self.loading_newer = value,
        }
    }

    fn staged_len(&self, direction: Direction) -> usize {
        match direction {
            Direction::Older => self.staged_older.len(),
            Direction::Newer => self.staged_newer.len(),
        }
    }

    /// Exclusive bound for the next fetch: the outermost known id.
    fn anchor(&self, direction: Direction) -> Option<MessageId> {
        match direction {
            Direction::Older => self
                .staged_older
                .first_key_value()
                .or_else(|| self.visible.first_key_value())
                .map(|(id, _)| *id),
            Direction::Newer => self
                .staged_newer
                .last_key_value()
                .or_else(|| self.visible.last_key_value())
                .map(|(id, _)| *id),
        }
    }

    fn contains(&self, id: MessageId) -> bool {
        self.visible.contains_key(&id)
            || self.staged_older.contains_key(&id)
            || self.staged_newer.contains_key(&id)
    }

    fn note_seen(&mut self, id: MessageId) {
        self.oldest_seen = Some(self.oldest_seen.map_or(id, |seen| seen.min(id)));
        self.newest_seen = Some(self.newest_seen.map_or(id, |seen| seen.max(id)));
    }

    fn stage(&mut self, direction: Direction, mut message: Message) {
        self.note_seen(message.id);
        message.mark_ownership(self.local_user);
        match direction {
            Direction::Older => self.staged_older.insert(message.id, message),
            Direction::Newer => self.staged_newer.insert(message.id, message),
        };
    }

    /// Evicts from the end opposite to `inserted_at` when over capacity.
    fn evict(&mut self, inserted_at: Direction) -> usize {
        let overflow = self.visible.len().saturating_sub(self.config.max_size);
        if overflow == 0 {
            return 0;
        }
        let count = overflow.max(self.config.page_size).min(self.visible.len());
        let mut evicted = BTreeMap::new();
        for _ in 0..count {
            let popped = match inserted_at {
                Direction::Older => self.visible.pop_last(),
                Direction::Newer => self.visible.pop_first(),
            };
            if let Some((id, message)) = popped {
                evicted.insert(id, message);
            }
        }
        match inserted_at {
            Direction::Older => {
                self.staged_newer = evicted;
                self.reached_newest = false;
            }
            Direction::Newer => {
                self.staged_older = evicted;
                self.reached_oldest = false;
            }
        }
        tracing::debug!(count, side = %inserted_at, "window over capacity, evicted opposite end");
        count
    }
}

/// One conversation's window, fed by REST pagination and live events.
///
/// Owned by its conversation view; all methods take `&self` so the view
/// and its dispatcher observer can share it behind an `Arc`.
pub struct WindowedMessageBuffer<A: ChatApi> {
    api: Arc<A>,
    config: WindowConfig,
    window: Mutex<MessageWindow>,
}

impl<A: ChatApi> WindowedMessageBuffer<A> {
    /// Creates an empty buffer.
    pub fn new(api: Arc<A>, config: WindowConfig) -> Self {
        let window = MessageWindow::new(config, api.local_user());
        Self {
            api,
            config,
            window: Mutex::new(window),
        }
    }

    /// Loads the most recent page of `conversation`, replacing any content,
    /// then marks the conversation read on the server.
    ///
    /// Returns the number of visible messages.
    ///
    /// # Errors
    ///
    /// [`WindowError::Api`] if the history fetch fails. A failed
    /// mark-as-read is only logged.
    pub async fn load_initial(&self, conversation: ConversationId) -> Result<usize, WindowError> {
        let generation = self.window.lock().reset(conversation);
        let page = self
            .api
            .latest_messages(conversation, self.config.initial_fetch)
            .await?;
        let visible = {
            let mut window = self.window.lock();
            if window.generation() != generation {
                tracing::debug!(%conversation, "initial page for a replaced window dropped");
                return Ok(0);
            }
            window.seed(page)
        };
        tracing::info!(%conversation, visible, "conversation loaded");

        if let Err(e) = self.api.mark_conversation_read(conversation).await {
            tracing::warn!(%conversation, error = %e, "failed to mark conversation read");
        }
        Ok(visible)
    }

    /// Fetches and stages the page before the oldest known message.
    ///
    /// # Errors
    ///
    /// [`WindowError::Api`] on REST failure (the guard is released so the
    /// user can retry), [`WindowError::NotLoaded`] before `load_initial`.
    pub async fn load_older(&self) -> Result<LoadOutcome, WindowError> {
        self.load(Direction::Older).await
    }

    /// Fetches and stages the page after the newest known message.
    ///
    /// # Errors
    ///
    /// As [`load_older`](Self::load_older).
    pub async fn load_newer(&self) -> Result<LoadOutcome, WindowError> {
        self.load(Direction::Newer).await
    }

    async fn load(&self, direction: Direction) -> Result<LoadOutcome, WindowError> {
        let ticket = self.window.lock().begin_fetch(direction)?;
        let Some(ticket) = ticket else {
            return Ok(LoadOutcome::Skipped);
        };
        let limit = self.config.page_size;
        let result = match direction {
            Direction::Older => {
                self.api
                    .messages_before(ticket.conversation(), ticket.anchor(), limit)
                    .await
            }
            Direction::Newer => {
                self.api
                    .messages_after(ticket.conversation(), ticket.anchor(), limit)
                    .await
            }
        };
        if let Err(e) = &result {
            tracing::warn!(%direction, error = %e, "history page fetch failed");
        }
        self.window.lock().finish_fetch(&ticket, result)
    }

    /// Splices the staged batch of `direction` into the visible window.
    pub fn splice_staged(&self, direction: Direction) -> SpliceOutcome {
        self.window.lock().splice(direction)
    }

    /// Admits a message the local user just sent (server-confirmed).
    pub fn append_sent(&self, message: Message) -> Admission {
        self.window.lock().admit(message)
    }

    /// Admits a message delivered over the chat socket.
    pub fn append_received(&self, message: Message) -> Admission {
        self.window.lock().admit(message)
    }

    /// Marks visible peer messages read; see [`MessageWindow::mark_visible_read`].
    pub fn mark_visible_read(&self, first: usize, last: usize, cap: usize) -> Vec<MessageId> {
        self.window.lock().mark_visible_read(first, last, cap)
    }

    /// Copy of the visible messages, ascending.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.window.lock().snapshot()
    }

    /// Number of visible messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.lock().len()
    }

    /// Whether nothing is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.lock().is_empty()
    }

    /// Whether the window shows the live end of the conversation.
    #[must_use]
    pub fn is_at_newest(&self) -> bool {
        self.window.lock().is_at_newest()
    }

    /// Whether the window shows the start of the conversation.
    #[must_use]
    pub fn is_at_oldest(&self) -> bool {
        self.window.lock().is_at_oldest()
    }

    /// Summary handoff for the chat list.
    #[must_use]
    pub fn closing_summary(&self) -> Option<SummaryUpdate> {
        self.window.lock().closing_summary()
    }

    /// Drops every message (logout).
    pub fn clear(&self) {
        self.window.lock().clear();
    }

    /// Runs `f` with read access to the window state.
    pub fn inspect<R>(&self, f: impl FnOnce(&MessageWindow) -> R) -> R {
        f(&self.window.lock())
    }
}
