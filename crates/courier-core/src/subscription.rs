//! Live subscriptions.
//!
//! A channel pushes messages into [`SubscriptionSink`]s. The sink only has
//! to accept a message or report that it can no longer take any, and to
//! accept a final close. [`Subscription`] is the standard sink: it forwards
//! into an unbounded queue drained by a [`SubscriptionStream`] owned by the
//! transport session.

use crate::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    /// Allocate a process-unique subscription ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Why a subscription was detached from its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The subscription received its single message on a simple channel.
    Delivered,
    /// The channel was removed from the registry.
    ChannelRemoved,
    /// The subscriber asked to stop receiving.
    Unsubscribed,
    /// The transport session carrying the subscription went away.
    TransportClosed,
}

impl CloseReason {
    /// Get the snake_case name used in logs and on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Delivered => "delivered",
            CloseReason::ChannelRemoved => "channel_removed",
            CloseReason::Unsubscribed => "unsubscribed",
            CloseReason::TransportClosed => "transport_closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription is detached or its receiving side is gone.
    #[error("Subscription closed")]
    Closed,
}

/// A live consumer of a channel.
///
/// Implementations must not block: `send` is called while the channel's
/// state is locked.
pub trait SubscriptionSink: Send + Sync {
    /// Get the subscription's identity.
    fn id(&self) -> SubscriptionId;

    /// Push a message to the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Closed`] if the consumer can no longer
    /// receive; the channel then detaches the subscription.
    fn send(&self, message: &Message) -> Result<(), SubscriptionError>;

    /// Detach the subscription. Only the first call has an effect.
    fn close(&self, reason: CloseReason);

    /// Check whether the subscription is still open.
    fn is_active(&self) -> bool;
}

/// Events observed on a [`SubscriptionStream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A message pushed by the channel.
    Message(Message),
    /// The subscription was detached; no further events follow.
    Closed(CloseReason),
}

/// Sink backed by an unbounded tokio channel.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    active: AtomicBool,
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
}

impl Subscription {
    /// Create a subscription and the stream that receives its events.
    #[must_use]
    pub fn new() -> (Arc<Self>, SubscriptionStream) {
        let id = SubscriptionId::generate();
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscription = Arc::new(Self {
            id,
            active: AtomicBool::new(true),
            sender,
        });
        (subscription, SubscriptionStream { id, receiver })
    }
}

impl SubscriptionSink for Subscription {
    fn id(&self) -> SubscriptionId {
        self.id
    }

    fn send(&self, message: &Message) -> Result<(), SubscriptionError> {
        if !self.active.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Closed);
        }
        self.sender
            .send(SubscriptionEvent::Message(message.clone()))
            .map_err(|_| {
                self.active.store(false, Ordering::SeqCst);
                SubscriptionError::Closed
            })
    }

    fn close(&self, reason: CloseReason) {
        if self.active.swap(false, Ordering::SeqCst) {
            // The stream may already be dropped.
            let _ = self.sender.send(SubscriptionEvent::Closed(reason));
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.sender.is_closed()
    }
}

/// Receiving side of a [`Subscription`].
///
/// Dropping the stream makes every later `send` into the subscription fail,
/// which detaches it from its channel on the next delivery attempt.
#[derive(Debug)]
pub struct SubscriptionStream {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl SubscriptionStream {
    /// Get the identity of the subscription feeding this stream.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event.
    ///
    /// Returns `None` after the [`SubscriptionEvent::Closed`] event has been
    /// read, even while the subscription itself is still referenced.
    pub async fn recv(&mut self) -> Option<SubscriptionEvent> {
        let event = self.receiver.recv().await;
        self.finish_on_close(event)
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SubscriptionEvent> {
        let event = self.receiver.try_recv().ok();
        self.finish_on_close(event)
    }

    fn finish_on_close(&mut self, event: Option<SubscriptionEvent>) -> Option<SubscriptionEvent> {
        if matches!(event, Some(SubscriptionEvent::Closed(_))) {
            self.receiver.close();
        }
        event
    }
}
