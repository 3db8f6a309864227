//! In-memory users, conversations and message history.
//!
//! The [`ChatStore`] is the whole backend state apart from live sockets and
//! tokens. Message ids are assigned from one global counter, so within a
//! conversation they increase with acceptance order.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use tokio::sync::RwLock;

use matchchat_proto::message::{ConversationId, ConversationSummary, Message, MessageId, UserId};
use matchchat_proto::profile::CandidateProfile;
use matchchat_proto::rest::SwipeAction;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No such conversation.
    #[error("conversation {0} not found")]
    NotFound(ConversationId),

    /// The user is not a participant of the conversation.
    #[error("user {user} is not part of conversation {conversation}")]
    NotMember {
        /// Requesting user.
        user: UserId,
        /// Conversation that was accessed.
        conversation: ConversationId,
    },
}

/// Which slice of a conversation's history to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// The most recent messages.
    Latest,
    /// Messages with an id below the given one.
    Before(MessageId),
    /// Messages with an id above the given one.
    After(MessageId),
}

struct Conversation {
    user1: UserId,
    user2: UserId,
    messages: Vec<Message>,
}

impl Conversation {
    fn has_member(&self, user: UserId) -> bool {
        self.user1 == user || self.user2 == user
    }

    fn other(&self, user: UserId) -> UserId {
        if self.user1 == user { self.user2 } else { self.user1 }
    }
}

#[derive(Default)]
struct Inner {
    profiles: BTreeMap<UserId, CandidateProfile>,
    conversations: BTreeMap<ConversationId, Conversation>,
    likes: HashSet<(UserId, UserId)>,
    swiped: HashMap<UserId, HashSet<UserId>>,
    next_message_id: i64,
    next_conversation_id: i64,
}

/// Backend state shared by every request handler.
pub struct ChatStore {
    inner: RwLock<Inner>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                next_message_id: 1,
                next_conversation_id: 1,
                ..Inner::default()
            }),
        }
    }

    /// Registers (or replaces) a user profile.
    pub async fn add_user(&self, profile: CandidateProfile) {
        self.inner.write().await.profiles.insert(profile.id, profile);
    }

    /// Creates a conversation between two users and returns its id.
    pub async fn create_conversation(&self, a: UserId, b: UserId) -> ConversationId {
        let mut inner = self.inner.write().await;
        let id = ConversationId::new(inner.next_conversation_id);
        inner.next_conversation_id += 1;
        inner.conversations.insert(
            id,
            Conversation {
                user1: a,
                user2: b,
                messages: Vec::new(),
            },
        );
        tracing::debug!(conversation = %id, user1 = %a, user2 = %b, "conversation created");
        id
    }

    /// The two participants of a conversation.
    pub async fn participants(&self, conversation: ConversationId) -> Option<(UserId, UserId)> {
        self.inner
            .read()
            .await
            .conversations
            .get(&conversation)
            .map(|c| (c.user1, c.user2))
    }

    /// Appends a message from `sender` and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::NotMember`].
    pub async fn insert_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.write().await;
        let id = MessageId::new(inner.next_message_id);
        let chat = inner
            .conversations
            .get_mut(&conversation)
            .ok_or(StoreError::NotFound(conversation))?;
        if !chat.has_member(sender) {
            return Err(StoreError::NotMember {
                user: sender,
                conversation,
            });
        }
        let message = Message {
            id,
            conversation_id: conversation,
            sender_id: sender,
            receiver_id: chat.other(sender),
            content: content.to_string(),
            is_read: false,
            created_at: Some(Utc::now()),
            is_mine: false,
        };
        chat.messages.push(message.clone());
        inner.next_message_id += 1;
        Ok(message)
    }

    /// Appends `count` alternating messages, oldest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the conversation does not exist.
    pub async fn seed_history(
        &self,
        conversation: ConversationId,
        count: usize,
    ) -> Result<(), StoreError> {
        let (user1, user2) = self
            .participants(conversation)
            .await
            .ok_or(StoreError::NotFound(conversation))?;
        for n in 1..=count {
            let sender = if n % 2 == 0 { user1 } else { user2 };
            self.insert_message(conversation, sender, &format!("message {n}"))
                .await?;
        }
        Ok(())
    }

    /// Returns one page of history in ascending id order.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::NotMember`].
    pub async fn history(
        &self,
        conversation: ConversationId,
        user: UserId,
        page: Page,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read().await;
        let chat = member_chat(&inner, conversation, user)?;
        let messages = &chat.messages;
        let slice: Vec<Message> = match page {
            Page::Latest => {
                let start = messages.len().saturating_sub(limit);
                messages[start..].to_vec()
            }
            Page::Before(id) => {
                let end = messages.partition_point(|m| m.id < id);
                messages[end.saturating_sub(limit)..end].to_vec()
            }
            Page::After(id) => {
                let start = messages.partition_point(|m| m.id <= id);
                messages[start..].iter().take(limit).cloned().collect()
            }
        };
        Ok(slice)
    }

    /// Marks the given messages addressed to `user` as read.
    ///
    /// Returns how many changed.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::NotMember`].
    pub async fn mark_read(
        &self,
        conversation: ConversationId,
        user: UserId,
        ids: &[MessageId],
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        member_chat(&inner, conversation, user)?;
        let Some(chat) = inner.conversations.get_mut(&conversation) else {
            return Err(StoreError::NotFound(conversation));
        };
        let wanted: HashSet<MessageId> = ids.iter().copied().collect();
        let mut changed = 0;
        for message in chat
            .messages
            .iter_mut()
            .filter(|m| m.receiver_id == user && !m.is_read && wanted.contains(&m.id))
        {
            message.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }

    /// Marks every message addressed to `user` in the conversation as read.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] or [`StoreError::NotMember`].
    pub async fn mark_conversation_read(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<usize, StoreError> {
        let ids: Vec<MessageId> = {
            let inner = self.inner.read().await;
            member_chat(&inner, conversation, user)?
                .messages
                .iter()
                .map(|m| m.id)
                .collect()
        };
        self.mark_read(conversation, user, &ids).await
    }

    /// Chat list of `user`, unsorted.
    pub async fn summaries(&self, user: UserId) -> Vec<ConversationSummary> {
        let inner = self.inner.read().await;
        inner
            .conversations
            .iter()
            .filter(|(_, c)| c.has_member(user))
            .map(|(id, c)| {
                let last = c.messages.last();
                ConversationSummary {
                    id: *id,
                    user1: c.user1,
                    user2: c.user2,
                    last_message: last.map(|m| m.content.clone()).unwrap_or_default(),
                    last_message_time: last.and_then(|m| m.created_at),
                    last_message_sender: last.map(|m| m.sender_id),
                    is_read: last.is_none_or(|m| m.is_read || m.sender_id == user),
                }
            })
            .collect()
    }

    /// Records a swipe. A like answering an earlier like from `target`
    /// creates their conversation, whose id is returned.
    pub async fn record_swipe(
        &self,
        user: UserId,
        target: UserId,
        action: SwipeAction,
    ) -> Option<ConversationId> {
        let matched = {
            let mut inner = self.inner.write().await;
            inner.swiped.entry(user).or_default().insert(target);
            if action != SwipeAction::Like {
                return None;
            }
            inner.likes.insert((user, target));
            inner.likes.contains(&(target, user))
        };
        if matched {
            Some(self.create_conversation(target, user).await)
        } else {
            None
        }
    }

    /// Profiles `user` has not swiped yet, ordered by id, after `last_seen`.
    pub async fn search(
        &self,
        user: UserId,
        last_seen: Option<UserId>,
        page_size: usize,
        age: (Option<u32>, Option<u32>),
    ) -> Vec<CandidateProfile> {
        let inner = self.inner.read().await;
        let swiped = inner.swiped.get(&user);
        let (min_age, max_age) = age;
        inner
            .profiles
            .values()
            .filter(|p| p.id != user)
            .filter(|p| last_seen.is_none_or(|last| p.id > last))
            .filter(|p| swiped.is_none_or(|s| !s.contains(&p.id)))
            .filter(|p| match p.age {
                Some(a) => min_age.is_none_or(|min| a >= min) && max_age.is_none_or(|max| a <= max),
                None => true,
            })
            .take(page_size)
            .cloned()
            .collect()
    }
}

fn member_chat(
    inner: &Inner,
    conversation: ConversationId,
    user: UserId,
) -> Result<&Conversation, StoreError> {
    let chat = inner
        .conversations
        .get(&conversation)
        .ok_or(StoreError::NotFound(conversation))?;
    if chat.has_member(user) {
        Ok(chat)
    } else {
        Err(StoreError::NotMember { user, conversation })
    }
}
