//! Fan-out of inbound events to registered observers.
//!
//! [`EventDispatcher`] is an actor: producers (the connection supervisor)
//! post events into an unbounded FIFO mailbox, and a single delivery task
//! owns the observer list and invokes observers one at a time. Delivery to
//! every observer is therefore serialized on one consumer context, and the
//! per-conversation order equals the order in which the transport received
//! the frames.
//!
//! Observers register for the lifetime of their owning view through a
//! [`Subscription`] guard. Dropping the guard flips a shared flag that the
//! delivery task checks before every call, so no event reaches an observer
//! after its view has let go of it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use matchchat_proto::frame::InboundEvent;

use crate::connection::ConnectionState;

/// Something the engine wants views to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A decoded inbound event with a recognized kind.
    Inbound(InboundEvent),
    /// The connection moved to a new state.
    StateChanged(ConnectionState),
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting {
        /// 1-based attempt counter since the connection was lost.
        attempt: u32,
        /// Backoff delay before the attempt.
        delay: Duration,
    },
    /// Non-fatal condition worth showing to the user.
    Notice(Notice),
}

/// Non-fatal, user-visible conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An inbound frame could not be decoded and was skipped.
    MalformedFrame {
        /// Decoder error message.
        reason: String,
    },
}

/// Why an observer refused an event.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The observer's consumer is gone; it will be removed.
    #[error("observer closed")]
    Closed,

    /// The observer failed on this event; it stays registered.
    #[error("observer failed: {0}")]
    Failed(String),
}

/// Receives events from the dispatcher's delivery task.
pub trait EventObserver: Send + 'static {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// [`ObserverError::Closed`] unregisters the observer;
    /// [`ObserverError::Failed`] is logged and delivery continues.
    fn on_event(&mut self, event: &ClientEvent) -> Result<(), ObserverError>;
}

impl<F> EventObserver for F
where
    F: FnMut(&ClientEvent) -> Result<(), ObserverError> + Send + 'static,
{
    fn on_event(&mut self, event: &ClientEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

enum Command {
    Register {
        id: u64,
        observer: Box<dyn EventObserver>,
        active: Arc<AtomicBool>,
    },
    Unregister(u64),
    Publish(ClientEvent),
}

/// Handle for posting events and registering observers.
///
/// Cheap to clone; all clones feed the same delivery task, which exits once
/// every handle and subscription is gone.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl EventDispatcher {
    /// Spawns the delivery task on the current tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(delivery_loop(rx));
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Posts an event for delivery to every registered observer.
    pub fn publish(&self, event: ClientEvent) {
        if self.tx.send(Command::Publish(event)).is_err() {
            tracing::debug!("dispatcher stopped, event discarded");
        }
    }

    /// Registers an observer until the returned guard is dropped.
    pub fn subscribe(&self, observer: impl EventObserver) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let registered = self
            .tx
            .send(Command::Register {
                id,
                observer: Box::new(observer),
                active: Arc::clone(&active),
            })
            .is_ok();
        if !registered {
            tracing::debug!(id, "dispatcher stopped, observer not registered");
            active.store(false, Ordering::Release);
        }
        Subscription {
            id,
            active,
            tx: self.tx.clone(),
        }
    }

    /// Registers a channel-backed observer and returns its receiving end.
    ///
    /// The observer unregisters itself once the receiver is dropped.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: &ClientEvent| {
            tx.send(event.clone()).map_err(|_| ObserverError::Closed)
        });
        (subscription, rx)
    }
}

/// Registration guard; the observer is removed when this is dropped.
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    /// Identifier assigned at registration.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Whether the observer still receives events.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Explicitly unregisters; equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        let _ = self.tx.send(Command::Unregister(self.id));
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

struct Entry {
    id: u64,
    observer: Box<dyn EventObserver>,
    active: Arc<AtomicBool>,
}

/// Delivery task: owns the observers and invokes them in registration order.
async fn delivery_loop(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut observers: Vec<Entry> = Vec::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register {
                id,
                observer,
                active,
            } => observers.push(Entry {
                id,
                observer,
                active,
            }),
            Command::Unregister(id) => observers.retain(|e| e.id != id),
            Command::Publish(event) => deliver(&mut observers, &event),
        }
    }
    tracing::debug!("dispatcher delivery task exiting");
}

fn deliver(observers: &mut Vec<Entry>, event: &ClientEvent) {
    observers.retain_mut(|entry| {
        if !entry.active.load(Ordering::Acquire) {
            return false;
        }
        match catch_unwind(AssertUnwindSafe(|| entry.observer.on_event(event))) {
            Ok(Ok(())) => true,
            Ok(Err(ObserverError::Closed)) => {
                tracing::debug!(id = entry.id, "observer closed, removing");
                false
            }
            Ok(Err(ObserverError::Failed(reason))) => {
                tracing::warn!(id = entry.id, reason = %reason, "observer failed");
                true
            }
            Err(_) => {
                tracing::error!(id = entry.id, "observer panicked, removing");
                false
            }
        }
    });
}
