//! Published messages.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A message published to a channel.
///
/// Cloning is cheap: the payload is reference counted, so the copy kept in
/// the channel queue and the copies pushed to subscribers share one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Process-unique, increasing identifier.
    pub id: MessageId,
    /// Channel the message was published to.
    pub channel: String,
    /// Opaque payload.
    pub payload: Bytes,
    /// Publish time in milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Message {
    /// Create a new message.
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
            channel: channel.into(),
            payload: payload.into(),
            timestamp: unix_millis(),
        }
    }
}
