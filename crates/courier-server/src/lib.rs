//! # Courier Server
//!
//! WebSocket front end for the Courier broker. Each connection exchanges
//! length-prefixed MessagePack frames (see `courier-protocol`) that map
//! one-to-one onto channel registry operations.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod session;

pub use config::Config;
pub use handlers::{app, run_server, serve, serve_with_shutdown, AppState, ConnectionSlot};
