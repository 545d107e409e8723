//! Per-connection session.
//!
//! A session decodes request frames from one WebSocket, applies them to the
//! registry and answers each with a response frame. Subscriptions opened on
//! the session are forwarded to the socket as `message` frames and detached
//! from their channels when the socket goes away.

use crate::handlers::{AppState, ConnectionSlot};
use crate::metrics::{self, OpenConnection, PublishOutcome};
use anyhow::Result;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use bytes::BytesMut;
use courier_core::{CloseReason, SubscriptionEvent, SubscriptionId, SubscriptionStream};
use courier_protocol::{codec, error_codes, Frame, ProtocolError, PROTOCOL_VERSION};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type EventSender = mpsc::UnboundedSender<(SubscriptionId, SubscriptionEvent)>;

/// A subscription opened by this session.
struct ActiveSubscription {
    channel: String,
    forwarder: JoinHandle<()>,
}

struct Session {
    connection_id: String,
    state: Arc<AppState>,
    sender: SplitSink<WebSocket, WsMessage>,
    subscriptions: HashMap<SubscriptionId, ActiveSubscription>,
    events: EventSender,
}

/// Handle a WebSocket connection until it closes.
///
/// `slot` stays held for the life of the session.
pub async fn handle_websocket(socket: WebSocket, slot: ConnectionSlot) {
    let _open = OpenConnection::track();
    let state = Arc::clone(slot.state());

    let connection_id = state.next_connection_id();
    debug!(connection = %connection_id, "WebSocket connected");

    let mut shutdown = state.shutdown_signal();
    let (sender, mut receiver) = socket.split();
    let (events, mut event_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        connection_id,
        state: Arc::clone(&state),
        sender,
        subscriptions: HashMap::new(),
        events,
    };

    let connected = Frame::connected(
        &session.connection_id,
        PROTOCOL_VERSION,
        state.config.server.heartbeat_interval_ms,
    );
    if session.send_frame(&connected).await.is_ok() {
        let mut read_buffer = BytesMut::with_capacity(4096);

        loop {
            tokio::select! {
                Ok(()) = shutdown.changed() => {
                    debug!(connection = %session.connection_id, "Closing for server shutdown");
                    let _ = session.sender.send(WsMessage::Close(None)).await;
                    break;
                }

                Some((id, event)) = event_rx.recv() => {
                    if session.forward_event(id, event).await.is_err() {
                        break;
                    }
                }

                msg = receiver.next() => {
                    let data = match msg {
                        Some(Ok(WsMessage::Binary(data))) => data,
                        Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                        Some(Ok(WsMessage::Ping(data))) => {
                            if session.sender.send(WsMessage::Pong(data)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        Some(Ok(WsMessage::Pong(_))) => continue,
                        Some(Ok(WsMessage::Close(_))) => {
                            debug!(connection = %session.connection_id, "Received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(connection = %session.connection_id, error = %e, "WebSocket error");
                            metrics::error("websocket");
                            break;
                        }
                        None => {
                            debug!(connection = %session.connection_id, "WebSocket stream ended");
                            break;
                        }
                    };

                    let start = Instant::now();
                    read_buffer.extend_from_slice(&data);
                    let keep_open = session.process_buffer(&mut read_buffer).await;
                    metrics::inbound_batch(start.elapsed());
                    if !keep_open {
                        break;
                    }
                }
            }
        }
    } else {
        warn!(connection = %session.connection_id, "Failed to send Connected frame");
    }

    session.close();
    drop(slot);
}

impl Session {
    /// Decode and handle every complete frame in `buf`.
    ///
    /// Returns `false` if the connection should be closed.
    async fn process_buffer(&mut self, buf: &mut BytesMut) -> bool {
        loop {
            match codec::decode_from(buf) {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(frame).await {
                        warn!(connection = %self.connection_id, error = %e, "Frame handling error");
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(ProtocolError::FrameTooLarge(size)) => {
                    warn!(connection = %self.connection_id, size, "Frame too large");
                    metrics::error("frame_too_large");
                    let frame = Frame::error(
                        0,
                        error_codes::INVALID_FRAME,
                        ProtocolError::FrameTooLarge(size).to_string(),
                    );
                    let _ = self.send_frame(&frame).await;
                    return false;
                }
                Err(e) => {
                    warn!(connection = %self.connection_id, error = %e, "Undecodable frame");
                    metrics::error("decode");
                    let frame = Frame::error(0, error_codes::INVALID_FRAME, e.to_string());
                    if self.send_frame(&frame).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Apply one request frame and send its response.
    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        let state = Arc::clone(&self.state);
        let registry = &state.registry;

        let response = match frame {
            Frame::CreateChannel {
                id,
                name,
                channel_type,
            } => {
                let success = registry.create(&name, channel_type);
                metrics::channel_count(registry.len());
                Frame::CreateChannelResult { id, success }
            }

            Frame::RemoveChannel { id, name } => {
                let success = registry.remove(&name);
                metrics::channel_count(registry.len());
                Frame::RemoveChannelResult { id, success }
            }

            Frame::ListChannels { id } => Frame::ChannelList {
                id,
                channels: registry.list(),
            },

            Frame::Publish {
                id,
                channel,
                payload,
            } => {
                let limit = state.config.channels.max_payload_size;
                if payload.len() > limit {
                    metrics::publish(PublishOutcome::TooLarge);
                    Frame::error(
                        id,
                        error_codes::MESSAGE_TOO_LARGE,
                        format!("Payload of {} bytes exceeds limit {}", payload.len(), limit),
                    )
                } else {
                    let success = registry.publish(&channel, payload);
                    metrics::publish(if success {
                        PublishOutcome::Accepted
                    } else {
                        PublishOutcome::NoSuchChannel
                    });
                    debug!(connection = %self.connection_id, channel = %channel, success, "Publish");
                    Frame::PublishResult { id, success }
                }
            }

            Frame::Subscribe { id, channel } => match registry.subscribe_stream(&channel) {
                Ok(stream) => {
                    let subscription = stream.id();
                    self.track(channel, stream);
                    metrics::subscription_opened();
                    Frame::Subscribed {
                        id,
                        subscription: subscription.0,
                    }
                }
                Err(e) => {
                    debug!(connection = %self.connection_id, error = %e, "Subscribe failed");
                    Frame::error(id, error_codes::CHANNEL_NOT_FOUND, e.to_string())
                }
            },

            Frame::Unsubscribe { id, subscription } => {
                let sub_id = SubscriptionId(subscription);
                match self.subscriptions.get(&sub_id) {
                    // The forwarder removes the entry once the close event arrives.
                    Some(active) => Frame::UnsubscribeResult {
                        id,
                        success: registry.unsubscribe(
                            &active.channel,
                            sub_id,
                            CloseReason::Unsubscribed,
                        ),
                    },
                    None => Frame::error(
                        id,
                        error_codes::UNKNOWN_SUBSCRIPTION,
                        format!("Unknown subscription: {}", subscription),
                    ),
                }
            }

            Frame::GetMessage {
                id,
                channel,
                timeout_ms,
            } => match registry.get_message(&channel, Duration::from_millis(timeout_ms)) {
                Ok(message) => Frame::GetMessageResult {
                    id,
                    payload: message.map(|m| m.payload.to_vec()),
                },
                Err(e) => Frame::error(id, error_codes::CHANNEL_NOT_FOUND, e.to_string()),
            },

            Frame::Ping { timestamp } => Frame::pong(timestamp),

            other => {
                warn!(
                    connection = %self.connection_id,
                    frame_type = ?other.frame_type(),
                    "Unexpected frame type"
                );
                Frame::error(
                    other.request_id().unwrap_or(0),
                    error_codes::INVALID_FRAME,
                    format!("Unexpected frame type {:?}", other.frame_type()),
                )
            }
        };

        self.send_frame(&response).await
    }

    /// Start forwarding a subscription stream into the session's event queue.
    fn track(&mut self, channel: String, mut stream: SubscriptionStream) {
        let id = stream.id();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let last = matches!(event, SubscriptionEvent::Closed(_));
                if events.send((id, event)).is_err() || last {
                    break;
                }
            }
        });

        debug!(connection = %self.connection_id, channel = %channel, subscription = %id, "Subscribed");
        self.subscriptions
            .insert(id, ActiveSubscription { channel, forwarder });
    }

    /// Write a subscription event to the socket.
    async fn forward_event(&mut self, id: SubscriptionId, event: SubscriptionEvent) -> Result<()> {
        let frame = match event {
            SubscriptionEvent::Message(message) => Frame::message(id.0, message.payload.to_vec()),
            SubscriptionEvent::Closed(reason) => {
                self.subscriptions.remove(&id);
                debug!(connection = %self.connection_id, subscription = %id, reason = %reason, "Subscription closed");
                Frame::subscription_closed(id.0, Some(reason.to_string()))
            }
        };
        self.send_frame(&frame).await
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let data = codec::encode(frame)?;
        metrics::frame_sent(data.len());
        self.sender.send(WsMessage::Binary(data.to_vec())).await?;
        Ok(())
    }

    /// Detach every subscription still open on this session.
    fn close(self) {
        let registry = &self.state.registry;
        for (id, active) in self.subscriptions {
            registry.unsubscribe(&active.channel, id, CloseReason::TransportClosed);
            active.forwarder.abort();
        }
        debug!(connection = %self.connection_id, "WebSocket disconnected");
    }
}
