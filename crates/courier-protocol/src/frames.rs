//! Frame types for the Courier protocol.
//!
//! Frames carry the broker's request/response contract. Requests are sent by
//! clients and answered with exactly one response frame carrying the same
//! `id`, except `Subscribe`, whose acknowledgment is followed by a stream of
//! `Message` frames ending with a `SubscriptionClosed` frame.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The frame could not be decoded or is not a valid request.
    pub const INVALID_FRAME: u16 = 1001;
    /// The target channel is not registered.
    pub const CHANNEL_NOT_FOUND: u16 = 1002;
    /// The published payload exceeds the configured limit.
    pub const MESSAGE_TOO_LARGE: u16 = 1003;
    /// The subscription id is not known to this connection.
    pub const UNKNOWN_SUBSCRIPTION: u16 = 1004;
}

/// Delivery semantics of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Each live-delivered message goes to one subscriber, which is then detached.
    Simple,
    /// Each message is broadcast to every active subscriber.
    Multiple,
}

impl ChannelType {
    /// Get the lowercase name used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Simple => "simple",
            ChannelType::Multiple => "multiple",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one registered channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Delivery semantics.
    pub channel_type: ChannelType,
    /// Number of messages in the channel queue.
    pub pending_count: u64,
    /// Number of attached subscribers.
    pub subscriber_count: u64,
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    CreateChannel = 0x01,
    CreateChannelResult = 0x02,
    RemoveChannel = 0x03,
    RemoveChannelResult = 0x04,
    ListChannels = 0x05,
    ChannelList = 0x06,
    Publish = 0x07,
    PublishResult = 0x08,
    Subscribe = 0x09,
    Subscribed = 0x0A,
    Unsubscribe = 0x0B,
    Message = 0x0C,
    SubscriptionClosed = 0x0D,
    GetMessage = 0x0E,
    GetMessageResult = 0x0F,
    Error = 0x10,
    Ping = 0x11,
    Pong = 0x12,
    Connected = 0x13,
    UnsubscribeResult = 0x14,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::CreateChannel),
            0x02 => Ok(FrameType::CreateChannelResult),
            0x03 => Ok(FrameType::RemoveChannel),
            0x04 => Ok(FrameType::RemoveChannelResult),
            0x05 => Ok(FrameType::ListChannels),
            0x06 => Ok(FrameType::ChannelList),
            0x07 => Ok(FrameType::Publish),
            0x08 => Ok(FrameType::PublishResult),
            0x09 => Ok(FrameType::Subscribe),
            0x0A => Ok(FrameType::Subscribed),
            0x0B => Ok(FrameType::Unsubscribe),
            0x0C => Ok(FrameType::Message),
            0x0D => Ok(FrameType::SubscriptionClosed),
            0x0E => Ok(FrameType::GetMessage),
            0x0F => Ok(FrameType::GetMessageResult),
            0x10 => Ok(FrameType::Error),
            0x11 => Ok(FrameType::Ping),
            0x12 => Ok(FrameType::Pong),
            0x13 => Ok(FrameType::Connected),
            0x14 => Ok(FrameType::UnsubscribeResult),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Create a channel.
    #[serde(rename = "create_channel")]
    CreateChannel {
        /// Request ID.
        id: u64,
        /// Channel name.
        name: String,
        /// Delivery semantics.
        channel_type: ChannelType,
    },

    /// Result of `CreateChannel`; `false` if the name is taken.
    #[serde(rename = "create_channel_result")]
    CreateChannelResult { id: u64, success: bool },

    /// Remove a channel.
    #[serde(rename = "remove_channel")]
    RemoveChannel {
        /// Request ID.
        id: u64,
        /// Channel name.
        name: String,
    },

    /// Result of `RemoveChannel`; `false` if the channel was not found.
    #[serde(rename = "remove_channel_result")]
    RemoveChannelResult { id: u64, success: bool },

    /// List registered channels.
    #[serde(rename = "list_channels")]
    ListChannels { id: u64 },

    /// Result of `ListChannels`.
    #[serde(rename = "channel_list")]
    ChannelList {
        id: u64,
        channels: Vec<ChannelInfo>,
    },

    /// Publish a payload to a channel.
    #[serde(rename = "publish")]
    Publish {
        /// Request ID.
        id: u64,
        /// Target channel.
        channel: String,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Result of `Publish`; `false` if the channel was not found.
    #[serde(rename = "publish_result")]
    PublishResult { id: u64, success: bool },

    /// Open a live subscription on a channel.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID.
        id: u64,
        /// Channel name.
        channel: String,
    },

    /// Subscription accepted.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// ID of the `Subscribe` request.
        id: u64,
        /// Identifier of the new subscription, used by later frames.
        subscription: u64,
    },

    /// Cancel a live subscription.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID.
        id: u64,
        /// Subscription to cancel.
        subscription: u64,
    },

    /// Result of `Unsubscribe`; `false` if the subscription had already been
    /// detached by the channel.
    #[serde(rename = "unsubscribe_result")]
    UnsubscribeResult { id: u64, success: bool },

    /// A payload pushed to a live subscription.
    #[serde(rename = "message")]
    Message {
        /// Receiving subscription.
        subscription: u64,
        /// Message payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// End of a subscription stream.
    #[serde(rename = "subscription_closed")]
    SubscriptionClosed {
        /// Closed subscription.
        subscription: u64,
        /// Why the stream ended.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Pull the oldest pending payload of a channel.
    #[serde(rename = "get_message")]
    GetMessage {
        /// Request ID.
        id: u64,
        /// Channel name.
        channel: String,
        /// Requested wait in milliseconds.
        #[serde(default)]
        timeout_ms: u64,
    },

    /// Result of `GetMessage`; no payload if the queue was empty.
    #[serde(rename = "get_message_result")]
    GetMessageResult {
        id: u64,
        #[serde(
            default,
            with = "serde_bytes",
            skip_serializing_if = "Option::is_none"
        )]
        payload: Option<Vec<u8>>,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Sent by the server once the connection is established.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Protocol version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::CreateChannel { .. } => FrameType::CreateChannel,
            Frame::CreateChannelResult { .. } => FrameType::CreateChannelResult,
            Frame::RemoveChannel { .. } => FrameType::RemoveChannel,
            Frame::RemoveChannelResult { .. } => FrameType::RemoveChannelResult,
            Frame::ListChannels { .. } => FrameType::ListChannels,
            Frame::ChannelList { .. } => FrameType::ChannelList,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::PublishResult { .. } => FrameType::PublishResult,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Subscribed { .. } => FrameType::Subscribed,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::UnsubscribeResult { .. } => FrameType::UnsubscribeResult,
            Frame::Message { .. } => FrameType::Message,
            Frame::SubscriptionClosed { .. } => FrameType::SubscriptionClosed,
            Frame::GetMessage { .. } => FrameType::GetMessage,
            Frame::GetMessageResult { .. } => FrameType::GetMessageResult,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
            Frame::Connected { .. } => FrameType::Connected,
        }
    }

    /// Get the request ID this frame carries or answers, if any.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::CreateChannel { id, .. }
            | Frame::CreateChannelResult { id, .. }
            | Frame::RemoveChannel { id, .. }
            | Frame::RemoveChannelResult { id, .. }
            | Frame::ListChannels { id }
            | Frame::ChannelList { id, .. }
            | Frame::Publish { id, .. }
            | Frame::PublishResult { id, .. }
            | Frame::Subscribe { id, .. }
            | Frame::Subscribed { id, .. }
            | Frame::Unsubscribe { id, .. }
            | Frame::UnsubscribeResult { id, .. }
            | Frame::GetMessage { id, .. }
            | Frame::GetMessageResult { id, .. }
            | Frame::Error { id, .. } => Some(*id),
            Frame::Message { .. }
            | Frame::SubscriptionClosed { .. }
            | Frame::Ping { .. }
            | Frame::Pong { .. }
            | Frame::Connected { .. } => None,
        }
    }

    /// Create a new CreateChannel frame.
    #[must_use]
    pub fn create_channel(id: u64, name: impl Into<String>, channel_type: ChannelType) -> Self {
        Frame::CreateChannel {
            id,
            name: name.into(),
            channel_type,
        }
    }

    /// Create a new RemoveChannel frame.
    #[must_use]
    pub fn remove_channel(id: u64, name: impl Into<String>) -> Self {
        Frame::RemoveChannel {
            id,
            name: name.into(),
        }
    }

    /// Create a new ListChannels frame.
    #[must_use]
    pub fn list_channels(id: u64) -> Self {
        Frame::ListChannels { id }
    }

    /// Create a new Publish frame.
    #[must_use]
    pub fn publish(id: u64, channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            id,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, channel: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            channel: channel.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, subscription: u64) -> Self {
        Frame::Unsubscribe { id, subscription }
    }

    /// Create a new GetMessage frame.
    #[must_use]
    pub fn get_message(id: u64, channel: impl Into<String>, timeout_ms: u64) -> Self {
        Frame::GetMessage {
            id,
            channel: channel.into(),
            timeout_ms,
        }
    }

    /// Create a new pushed Message frame.
    #[must_use]
    pub fn message(subscription: u64, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Message {
            subscription,
            payload: payload.into(),
        }
    }

    /// Create a new SubscriptionClosed frame.
    #[must_use]
    pub fn subscription_closed(subscription: u64, reason: Option<String>) -> Self {
        Frame::SubscriptionClosed {
            subscription,
            reason,
        }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }
}
