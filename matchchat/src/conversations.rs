//! The chat list: one summary row per conversation, most recent first.

use chrono::{DateTime, Utc};

use matchchat_proto::frame::{EventKind, InboundEvent};
use matchchat_proto::message::{ConversationId, ConversationSummary, SummaryUpdate, UserId};

/// Ordered conversation summaries plus the currently open conversation.
#[derive(Debug)]
pub struct ConversationList {
    local_user: UserId,
    rows: Vec<ConversationSummary>,
    open: Option<ConversationId>,
}

impl ConversationList {
    #[must_use]
    pub const fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            rows: Vec::new(),
            open: None,
        }
    }

    /// Replaces every row with a freshly loaded list.
    ///
    /// Duplicate ids keep their first occurrence. Rows are ordered by last
    /// message time, newest first; conversations without messages go last.
    pub fn replace_all(&mut self, summaries: Vec<ConversationSummary>) {
        let mut seen = std::collections::HashSet::new();
        self.rows = summaries.into_iter().filter(|s| seen.insert(s.id)).collect();
        self.sort();
    }

    /// Applies a live chat message to its row and moves the row to the top.
    ///
    /// The row is marked unread unless its conversation is open. Returns
    /// `false` if the event is not a chat message or names no known row.
    pub fn apply_inbound(&mut self, event: &InboundEvent, now: DateTime<Utc>) -> bool {
        if event.kind != EventKind::ChatMessage {
            return false;
        }
        let Some(conversation) = event.conversation_id else {
            return false;
        };
        let Some(index) = self.rows.iter().position(|r| r.id == conversation) else {
            tracing::debug!(%conversation, "message for a conversation not in the list");
            return false;
        };

        let mut row = self.rows.remove(index);
        row.last_message_time = Some(now);
        if let Some(content) = &event.content {
            row.last_message.clone_from(content);
        }
        if event.sender_id.is_some() {
            row.last_message_sender = event.sender_id;
        }
        if self.open != Some(conversation) {
            row.is_read = false;
        }
        self.rows.insert(0, row);
        true
    }

    /// Applies the handoff of a closing view and forgets the open
    /// conversation.
    pub fn apply_update(&mut self, update: &SummaryUpdate) {
        if let Some(row) = self.rows.iter_mut().find(|r| r.id == update.conversation_id) {
            row.apply(update);
        }
        if self.open == Some(update.conversation_id) {
            self.open = None;
        }
        self.sort();
    }

    /// Records which conversation is on screen and marks its row read.
    pub fn set_open(&mut self, conversation: Option<ConversationId>) {
        self.open = conversation;
        if let Some(conversation) = conversation {
            if let Some(row) = self.rows.iter_mut().find(|r| r.id == conversation) {
                row.is_read = true;
            }
        }
    }

    #[must_use]
    pub const fn open(&self) -> Option<ConversationId> {
        self.open
    }

    #[must_use]
    pub fn get(&self, conversation: ConversationId) -> Option<&ConversationSummary> {
        self.rows.iter().find(|r| r.id == conversation)
    }

    /// The other participant of `conversation`.
    #[must_use]
    pub fn peer(&self, conversation: ConversationId) -> Option<UserId> {
        self.get(conversation).map(|r| r.peer_of(self.local_user))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.rows.iter()
    }

    /// Copy of the rows in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConversationSummary> {
        self.rows.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drops every row (logout).
    pub fn clear(&mut self) {
        self.rows.clear();
        self.open = None;
    }

    fn sort(&mut self) {
        // `None < Some`, so comparing b to a puts empty conversations last.
        self.rows
            .sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    }
}
