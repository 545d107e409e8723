//! # courier-core
//!
//! In-process state of the Courier broker.
//!
//! - **ChannelRegistry** - name to channel map with atomic create/remove
//! - **Channel** - per-channel queue and subscriber list, delivery engine
//! - **Subscription** - live consumer handle and its event stream
//! - **Message** - a published payload
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Transport  │────▶│ ChannelRegistry │────▶│   Channel   │
//! └─────────────┘     └─────────────────┘     └──────┬──────┘
//!        ▲                                           │ send / close
//!        │            ┌────────────────────┐         ▼
//!        └────────────│ SubscriptionStream │◀── Subscription
//!                     └────────────────────┘
//! ```
//!
//! Simple channels hand each published message to at most one subscriber and
//! detach it; multiple channels broadcast to every attached subscriber. In
//! both cases the message is also kept in the channel queue until pulled.

pub mod channel;
pub mod message;
pub mod registry;
pub mod subscription;

pub use channel::{Channel, ChannelClosed, ChannelId};
pub use courier_protocol::{ChannelInfo, ChannelType};
pub use message::Message;
pub use registry::{ChannelRegistry, RegistryError, RegistryStats};
pub use subscription::{
    CloseReason, Subscription, SubscriptionError, SubscriptionEvent, SubscriptionId,
    SubscriptionSink, SubscriptionStream,
};
