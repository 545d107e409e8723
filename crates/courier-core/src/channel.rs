//! Channel delivery engine.
//!
//! A channel owns its message queue and its ordered subscriber list behind a
//! single lock. Publishing decides between live delivery and queue-only in
//! the same critical section that appends to the queue, so concurrent
//! publishers and subscribers always observe some serial order.

use crate::message::Message;
use crate::subscription::{CloseReason, SubscriptionId, SubscriptionSink};
use bytes::Bytes;
use courier_protocol::{ChannelInfo, ChannelType};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// A channel identifier.
pub type ChannelId = String;

/// The channel was removed from the registry while the caller held it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Channel closed: {0}")]
pub struct ChannelClosed(pub ChannelId);

#[derive(Default)]
struct ChannelState {
    /// Every message published and not yet pulled, oldest first.
    queue: VecDeque<Message>,
    /// Attached subscribers in registration order.
    subscribers: VecDeque<Arc<dyn SubscriptionSink>>,
    closed: bool,
}

/// A named channel.
pub struct Channel {
    name: ChannelId,
    channel_type: ChannelType,
    state: Mutex<ChannelState>,
}

impl Channel {
    /// Create a new, empty channel.
    #[must_use]
    pub fn new(name: impl Into<ChannelId>, channel_type: ChannelType) -> Self {
        Self {
            name: name.into(),
            channel_type,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Get the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the channel's delivery semantics.
    #[must_use]
    pub fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    // Nothing in the critical sections can leave the state half-updated,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a payload.
    ///
    /// The message is always appended to the queue. A simple channel also
    /// hands it to the oldest attached subscriber, which is then detached; a
    /// multiple channel pushes it to every attached subscriber.
    ///
    /// Returns `false` only if the channel has been removed.
    pub fn publish(&self, payload: impl Into<Bytes>) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }

        let message = Message::new(self.name.clone(), payload);
        state.queue.push_back(message.clone());

        let recipients = match self.channel_type {
            ChannelType::Simple => self.deliver_one(&mut state, &message),
            ChannelType::Multiple => self.broadcast(&mut state, &message),
        };

        trace!(
            channel = %self.name,
            message = message.id,
            recipients,
            pending = state.queue.len(),
            "Published message"
        );
        true
    }

    fn deliver_one(&self, state: &mut ChannelState, message: &Message) -> usize {
        while let Some(subscriber) = state.subscribers.pop_front() {
            if subscriber.send(message).is_ok() {
                subscriber.close(CloseReason::Delivered);
                return 1;
            }
            warn!(
                channel = %self.name,
                subscription = %subscriber.id(),
                "Dropping dead subscriber"
            );
        }
        0
    }

    fn broadcast(&self, state: &mut ChannelState, message: &Message) -> usize {
        state.subscribers.retain(|subscriber| {
            let delivered = subscriber.send(message).is_ok();
            if !delivered {
                warn!(
                    channel = %self.name,
                    subscription = %subscriber.id(),
                    "Dropping dead subscriber"
                );
            }
            delivered
        });
        state.subscribers.len()
    }

    /// Attach a subscriber.
    ///
    /// Messages already queued are not replayed to it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] if the channel has been removed; the
    /// subscriber is closed with [`CloseReason::ChannelRemoved`].
    pub fn subscribe(&self, subscriber: Arc<dyn SubscriptionSink>) -> Result<(), ChannelClosed> {
        let mut state = self.lock();
        if state.closed {
            subscriber.close(CloseReason::ChannelRemoved);
            return Err(ChannelClosed(self.name.clone()));
        }

        debug!(
            channel = %self.name,
            subscription = %subscriber.id(),
            subscribers = state.subscribers.len() + 1,
            "Subscribed"
        );
        state.subscribers.push_back(subscriber);
        Ok(())
    }

    /// Detach a subscriber and close it with `reason`.
    ///
    /// Returns `true` if the subscriber was attached.
    pub fn unsubscribe(&self, id: SubscriptionId, reason: CloseReason) -> bool {
        let mut state = self.lock();
        let Some(index) = state.subscribers.iter().position(|s| s.id() == id) else {
            return false;
        };

        if let Some(subscriber) = state.subscribers.remove(index) {
            subscriber.close(reason);
        }
        debug!(
            channel = %self.name,
            subscription = %id,
            reason = %reason,
            subscribers = state.subscribers.len(),
            "Unsubscribed"
        );
        true
    }

    /// Remove and return the oldest queued message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelClosed`] if the channel has been removed.
    pub fn get_message(&self) -> Result<Option<Message>, ChannelClosed> {
        let mut state = self.lock();
        if state.closed {
            return Err(ChannelClosed(self.name.clone()));
        }
        Ok(state.queue.pop_front())
    }

    /// Get the number of queued messages.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().queue.len()
    }

    /// Get the number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Check whether the channel has been removed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Snapshot the channel for listings.
    #[must_use]
    pub fn info(&self) -> ChannelInfo {
        let state = self.lock();
        ChannelInfo {
            name: self.name.clone(),
            channel_type: self.channel_type,
            pending_count: state.queue.len() as u64,
            subscriber_count: state.subscribers.len() as u64,
        }
    }

    /// Close the channel: drop its queue and close every subscriber.
    ///
    /// Later operations through a stale reference see the channel as gone.
    pub(crate) fn close(&self) {
        let mut state = self.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.queue.clear();

        let detached = state.subscribers.len();
        for subscriber in state.subscribers.drain(..) {
            subscriber.close(CloseReason::ChannelRemoved);
        }
        debug!(channel = %self.name, detached, "Channel closed");
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("channel_type", &self.channel_type)
            .finish_non_exhaustive()
    }
}
