//! # courier-protocol
//!
//! Wire protocol for the Courier broker.
//!
//! Clients talk to the broker with length-prefixed MessagePack [`Frame`]s.
//! Every request carries an `id` that the matching response echoes back;
//! live subscriptions additionally receive `message` frames tagged with the
//! subscription identifier returned in `subscribed`.
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, ChannelType, Frame};
//!
//! let frame = Frame::create_channel(1, "jobs", ChannelType::Simple);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{error_codes, ChannelInfo, ChannelType, Frame, FrameType};

/// Protocol version announced in the `connected` frame.
pub const PROTOCOL_VERSION: u8 = 1;
