//! Engine façade for one logged-in user.
//!
//! [`ChatClient`] wires the REST API, the connection manager, the event
//! dispatcher and the chat list together, and hands out one
//! [`ConversationView`] per opened conversation. A view owns its message
//! window, its read-receipt batcher and its dispatcher subscription; closing
//! it sends a summary handoff back to the chat list over a typed channel.

use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use matchchat_proto::frame::{EventKind, InboundEvent, WireFrame};
use matchchat_proto::message::{ConversationId, ConversationSummary, Message, SummaryUpdate, UserId};
use matchchat_proto::profile::SearchFilter;
use matchchat_proto::rest::SendMessageRequest;

use crate::api::{ApiError, ChatApi};
use crate::config::{ClientConfig, FeedConfig, ReceiptConfig, WindowConfig};
use crate::connection::{ConnectError, ConnectionManager, ConnectionState};
use crate::conversations::ConversationList;
use crate::dispatch::{ClientEvent, EventDispatcher, EventObserver, ObserverError, Subscription};
use crate::feed::CandidateFeed;
use crate::receipts::ReadReceiptBatcher;
use crate::transport::Connector;
use crate::window::{Direction, LoadOutcome, SpliceOutcome, WindowError, WindowedMessageBuffer};

/// Handoff from a closing conversation view to the chat list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListUpdate {
    /// New preview for the conversation's row.
    Summary(SummaryUpdate),
    /// The view closed with nothing to report.
    Closed(ConversationId),
}

/// Chat engine for one logged-in user.
pub struct ChatClient<A: ChatApi, C: Connector> {
    api: Arc<A>,
    window: WindowConfig,
    receipts: ReceiptConfig,
    feed: FeedConfig,
    dispatcher: EventDispatcher,
    connection: ConnectionManager<A, C>,
    list: Arc<Mutex<ConversationList>>,
    _list_observer: Subscription,
    updates_tx: mpsc::UnboundedSender<ListUpdate>,
    updates_rx: Mutex<mpsc::UnboundedReceiver<ListUpdate>>,
    open_buffers: Mutex<Vec<Weak<WindowedMessageBuffer<A>>>>,
}

impl<A: ChatApi, C: Connector> ChatClient<A, C> {
    /// Builds the engine. Must be called inside a tokio runtime.
    pub fn new(api: Arc<A>, connector: C, config: &ClientConfig) -> Self {
        let dispatcher = EventDispatcher::spawn();
        let connection = ConnectionManager::new(
            Arc::clone(&api),
            connector,
            config.reconnect,
            dispatcher.clone(),
        );
        let list = Arc::new(Mutex::new(ConversationList::new(api.local_user())));
        let list_observer = {
            let list = Arc::clone(&list);
            dispatcher.subscribe(move |event: &ClientEvent| -> Result<(), ObserverError> {
                if let ClientEvent::Inbound(inbound) = event {
                    list.lock().apply_inbound(inbound, Utc::now());
                }
                Ok(())
            })
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        Self {
            api,
            window: config.window,
            receipts: config.receipts,
            feed: config.feed,
            dispatcher,
            connection,
            list,
            _list_observer: list_observer,
            updates_tx,
            updates_rx: Mutex::new(updates_rx),
            open_buffers: Mutex::new(Vec::new()),
        }
    }

    /// The REST client.
    #[must_use]
    pub const fn api(&self) -> &Arc<A> {
        &self.api
    }

    /// Opens the chat socket; see [`ConnectionManager::connect`].
    ///
    /// # Errors
    ///
    /// The first connection attempt failed.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.connection.connect().await
    }

    /// Closes the chat socket and stops reconnecting.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Registers an observer for every client event.
    pub fn subscribe(&self, observer: impl EventObserver) -> Subscription {
        self.dispatcher.subscribe(observer)
    }

    /// Registers a channel observer for every client event.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<ClientEvent>) {
        self.dispatcher.subscribe_channel()
    }

    /// Writes a raw frame to the chat socket; `false` if it was not sent.
    pub async fn send_frame(&self, frame: &WireFrame) -> bool {
        self.connection.send(frame).await
    }

    /// Reloads the chat list from the server.
    ///
    /// # Errors
    ///
    /// The REST call failed; the current list is kept.
    pub async fn load_conversations(&self) -> Result<usize, ApiError> {
        let summaries = self.api.conversations().await?;
        let mut list = self.list.lock();
        list.replace_all(summaries);
        tracing::info!(count = list.len(), "conversation list loaded");
        Ok(list.len())
    }

    /// Chat list rows in display order, with pending handoffs applied.
    #[must_use]
    pub fn conversations(&self) -> Vec<ConversationSummary> {
        self.apply_list_updates();
        self.list.lock().snapshot()
    }

    /// Opens `conversation`: subscribes to its live events, then loads the
    /// most recent page.
    ///
    /// # Errors
    ///
    /// [`WindowError::UnknownConversation`] if it is not in the chat list,
    /// [`WindowError::Api`] if the initial page could not be fetched.
    pub async fn open_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationView<A>, WindowError> {
        self.apply_list_updates();
        let peer = self
            .list
            .lock()
            .peer(conversation)
            .ok_or(WindowError::UnknownConversation(conversation))?;

        let buffer = Arc::new(WindowedMessageBuffer::new(Arc::clone(&self.api), self.window));
        let subscription = self.dispatcher.subscribe(LiveMessages {
            conversation,
            peer,
            local_user: self.api.local_user(),
            buffer: Arc::downgrade(&buffer),
        });
        self.list.lock().set_open(Some(conversation));

        if let Err(e) = buffer.load_initial(conversation).await {
            tracing::warn!(%conversation, error = %e, "failed to open conversation");
            self.list.lock().set_open(None);
            return Err(e);
        }

        {
            let mut open = self.open_buffers.lock();
            open.retain(|b| b.strong_count() > 0);
            open.push(Arc::downgrade(&buffer));
        }
        Ok(ConversationView {
            conversation,
            peer,
            local_user: self.api.local_user(),
            api: Arc::clone(&self.api),
            receipts: ReadReceiptBatcher::new(Arc::clone(&self.api), conversation, self.receipts),
            max_per_scroll: self.receipts.max_per_scroll,
            buffer,
            subscription,
            updates: self.updates_tx.clone(),
        })
    }

    /// Creates a candidate feed for the swipe screen.
    pub fn candidate_feed(&self, filter: SearchFilter) -> CandidateFeed<A> {
        CandidateFeed::new(Arc::clone(&self.api), self.feed, filter)
    }

    /// Disconnects, drops every cached message and conversation row, and
    /// forgets the credentials.
    pub async fn logout(&self) {
        self.connection.disconnect().await;
        let buffers: Vec<_> = std::mem::take(&mut *self.open_buffers.lock());
        for buffer in buffers.iter().filter_map(Weak::upgrade) {
            buffer.clear();
        }
        self.list.lock().clear();
        while self.updates_rx.lock().try_recv().is_ok() {}
        self.api.clear_credentials();
        tracing::info!("logged out");
    }

    fn apply_list_updates(&self) {
        let mut rx = self.updates_rx.lock();
        let mut list = self.list.lock();
        while let Ok(update) = rx.try_recv() {
            match update {
                ListUpdate::Summary(summary) => list.apply_update(&summary),
                ListUpdate::Closed(conversation) => {
                    if list.open() == Some(conversation) {
                        list.set_open(None);
                    }
                }
            }
        }
    }
}

/// Dispatcher observer feeding one conversation's live messages into its
/// window.
struct LiveMessages<A: ChatApi> {
    conversation: ConversationId,
    peer: UserId,
    local_user: UserId,
    buffer: Weak<WindowedMessageBuffer<A>>,
}

impl<A: ChatApi> LiveMessages<A> {
    fn to_message(&self, event: &InboundEvent) -> Option<Message> {
        let id = event.id?;
        let sender = event.sender_id.unwrap_or(self.peer);
        let receiver = if sender == self.local_user {
            self.peer
        } else {
            self.local_user
        };
        Some(Message {
            id,
            conversation_id: self.conversation,
            sender_id: sender,
            receiver_id: receiver,
            content: event.content.clone().unwrap_or_default(),
            is_read: false,
            created_at: Some(Utc::now()),
            is_mine: false,
        })
    }
}

impl<A: ChatApi> EventObserver for LiveMessages<A> {
    fn on_event(&mut self, event: &ClientEvent) -> Result<(), ObserverError> {
        let ClientEvent::Inbound(inbound) = event else {
            return Ok(());
        };
        if inbound.kind != EventKind::ChatMessage || !inbound.is_for(self.conversation) {
            return Ok(());
        }
        let buffer = self.buffer.upgrade().ok_or(ObserverError::Closed)?;
        match self.to_message(inbound) {
            Some(message) => {
                let admission = buffer.append_received(message);
                tracing::trace!(conversation = %self.conversation, ?admission, "live message");
            }
            None => tracing::debug!(conversation = %self.conversation, "live message without id skipped"),
        }
        Ok(())
    }
}

/// One open conversation.
pub struct ConversationView<A: ChatApi> {
    conversation: ConversationId,
    peer: UserId,
    local_user: UserId,
    api: Arc<A>,
    buffer: Arc<WindowedMessageBuffer<A>>,
    receipts: ReadReceiptBatcher<A>,
    max_per_scroll: usize,
    subscription: Subscription,
    updates: mpsc::UnboundedSender<ListUpdate>,
}

impl<A: ChatApi> ConversationView<A> {
    #[must_use]
    pub const fn conversation(&self) -> ConversationId {
        self.conversation
    }

    #[must_use]
    pub const fn peer(&self) -> UserId {
        self.peer
    }

    /// The message window backing this view.
    #[must_use]
    pub fn buffer(&self) -> &WindowedMessageBuffer<A> {
        &self.buffer
    }

    /// Visible messages, ascending.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.buffer.snapshot()
    }

    /// Fetches older history and splices it in.
    ///
    /// # Errors
    ///
    /// See [`WindowedMessageBuffer::load_older`].
    pub async fn show_older(&self) -> Result<SpliceOutcome, WindowError> {
        self.show(Direction::Older).await
    }

    /// Fetches newer history and splices it in.
    ///
    /// # Errors
    ///
    /// See [`WindowedMessageBuffer::load_newer`].
    pub async fn show_newer(&self) -> Result<SpliceOutcome, WindowError> {
        self.show(Direction::Newer).await
    }

    async fn show(&self, direction: Direction) -> Result<SpliceOutcome, WindowError> {
        let outcome = match direction {
            Direction::Older => self.buffer.load_older().await?,
            Direction::Newer => self.buffer.load_newer().await?,
        };
        if outcome == LoadOutcome::Skipped {
            tracing::trace!(%direction, "nothing fetched, splicing staged batch only");
        }
        Ok(self.buffer.splice_staged(direction))
    }

    /// Sends `text` to the peer and shows the server-confirmed message.
    ///
    /// # Errors
    ///
    /// [`WindowError::EmptyMessage`] for blank text, [`WindowError::Api`]
    /// if the server rejected the message.
    pub async fn send_text(&self, text: &str) -> Result<Message, WindowError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(WindowError::EmptyMessage);
        }
        let request = SendMessageRequest {
            chat_id: self.conversation,
            sender_id: self.local_user,
            receiver_id: self.peer,
            content: content.to_string(),
        };
        let mut message = self.api.send_message(request).await?;
        message.mark_ownership(self.local_user);
        self.buffer.append_sent(message.clone());
        Ok(message)
    }

    /// Reports the visible position range after a scroll; peer messages in
    /// it are marked read locally and queued as read receipts.
    ///
    /// Returns the number of receipts queued.
    pub fn on_scrolled(&self, first: usize, last: usize) -> usize {
        if self.receipts.is_suppressed() {
            return 0;
        }
        let ids = self.buffer.mark_visible_read(first, last, self.max_per_scroll);
        self.receipts.mark_many(ids)
    }

    /// Closes the view: stops live delivery, flushes pending receipts and
    /// hands the last visible message back to the chat list.
    pub async fn close(self) {
        let Self {
            conversation,
            buffer,
            receipts,
            subscription,
            updates,
            ..
        } = self;
        subscription.unsubscribe();
        receipts.flush().await;

        let update = buffer
            .closing_summary()
            .map_or(ListUpdate::Closed(conversation), ListUpdate::Summary);
        if updates.send(update).is_err() {
            tracing::debug!(%conversation, "chat list gone, handoff dropped");
        }
        tracing::info!(%conversation, "conversation closed");
    }
}
