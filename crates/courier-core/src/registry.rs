//! Channel registry.
//!
//! The registry maps channel names to channels. Creation and removal are
//! atomic per name; every other operation resolves the channel and then acts
//! on that channel alone.

use crate::channel::{Channel, ChannelClosed, ChannelId};
use crate::message::Message;
use crate::subscription::{
    CloseReason, Subscription, SubscriptionId, SubscriptionSink, SubscriptionStream,
};
use bytes::Bytes;
use courier_protocol::{ChannelInfo, ChannelType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Channel not found.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

impl From<ChannelClosed> for RegistryError {
    fn from(closed: ChannelClosed) -> Self {
        RegistryError::ChannelNotFound(closed.0)
    }
}

/// The set of registered channels.
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        info!("Creating channel registry");
        Self {
            channels: DashMap::new(),
        }
    }

    /// Register a new channel.
    ///
    /// Returns `false` without touching the existing channel if the name is
    /// already registered.
    pub fn create(&self, name: &str, channel_type: ChannelType) -> bool {
        match self.channels.entry(name.to_string()) {
            Entry::Occupied(_) => {
                debug!(channel = %name, "Channel already exists");
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Channel::new(name, channel_type)));
                debug!(channel = %name, channel_type = %channel_type, "Created channel");
                true
            }
        }
    }

    /// Remove a channel, closing every one of its subscribers.
    ///
    /// Returns `false` if the channel was not registered.
    pub fn remove(&self, name: &str) -> bool {
        match self.channels.remove(name) {
            Some((_, channel)) => {
                channel.close();
                debug!(channel = %name, "Removed channel");
                true
            }
            None => {
                debug!(channel = %name, "Remove of non-existent channel");
                false
            }
        }
    }

    /// Look up a channel.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if a channel exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    /// Snapshot every registered channel.
    ///
    /// Each entry is read under its own channel lock; entries are not
    /// mutually consistent with concurrent creates and removes.
    #[must_use]
    pub fn list(&self) -> Vec<ChannelInfo> {
        self.snapshot().iter().map(|channel| channel.info()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Channel>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Publish a payload to a channel.
    ///
    /// Returns `false` if the channel does not exist.
    pub fn publish(&self, name: &str, payload: impl Into<Bytes>) -> bool {
        match self.get(name) {
            Some(channel) => channel.publish(payload),
            None => {
                debug!(channel = %name, "Publish to non-existent channel");
                false
            }
        }
    }

    /// Attach a subscriber to a channel.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ChannelNotFound`] if the channel does not
    /// exist or is removed concurrently.
    pub fn subscribe(
        &self,
        name: &str,
        subscriber: Arc<dyn SubscriptionSink>,
    ) -> Result<(), RegistryError> {
        let channel = self
            .get(name)
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))?;
        channel.subscribe(subscriber)?;
        Ok(())
    }

    /// Open a [`Subscription`] on a channel and return its stream.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ChannelNotFound`] if the channel does not exist.
    pub fn subscribe_stream(&self, name: &str) -> Result<SubscriptionStream, RegistryError> {
        let (subscription, stream) = Subscription::new();
        self.subscribe(name, subscription)?;
        Ok(stream)
    }

    /// Detach a subscriber from a channel.
    ///
    /// Returns `false` if the channel does not exist or the subscriber was
    /// not attached, for example because it was already detached by a
    /// delivery.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId, reason: CloseReason) -> bool {
        self.get(name)
            .is_some_and(|channel| channel.unsubscribe(id, reason))
    }

    /// Pull the oldest pending message of a channel.
    ///
    /// The call never waits: `timeout` is accepted for protocol
    /// compatibility and an empty queue yields `None` immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ChannelNotFound`] if the channel does not exist.
    pub fn get_message(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<Option<Message>, RegistryError> {
        let channel = self
            .get(name)
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))?;
        let message = channel.get_message()?;
        trace!(
            channel = %name,
            timeout_ms = timeout.as_millis() as u64,
            found = message.is_some(),
            "Pulled message"
        );
        Ok(message)
    }

    /// Get the number of registered channels without touching any channel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check whether no channel is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let channels = self.snapshot();
        RegistryStats {
            channel_count: channels.len(),
            pending_messages: channels.iter().map(|c| c.pending_count()).sum(),
            subscribers: channels.iter().map(|c| c.subscriber_count()).sum(),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered channels.
    pub channel_count: usize,
    /// Messages queued across all channels.
    pub pending_messages: usize,
    /// Subscribers attached across all channels.
    pub subscribers: usize,
}
