//! Prometheus instrumentation.
//!
//! Every recording function is a no-op until [`install`] has registered the
//! exporter, so tests and servers with metrics disabled pay nothing.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

const CONNECTIONS_TOTAL: &str = "courier_connections_total";
const CONNECTIONS_OPEN: &str = "courier_connections_open";
const CHANNELS: &str = "courier_channels";
const PUBLISHES_TOTAL: &str = "courier_publishes_total";
const SUBSCRIPTIONS_TOTAL: &str = "courier_subscriptions_total";
const OUTBOUND_FRAMES_TOTAL: &str = "courier_outbound_frames_total";
const OUTBOUND_BYTES_TOTAL: &str = "courier_outbound_bytes_total";
const BATCH_SECONDS: &str = "courier_inbound_batch_seconds";
const ERRORS_TOTAL: &str = "courier_errors_total";

/// How a publish request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    NoSuchChannel,
    TooLarge,
}

impl PublishOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::NoSuchChannel => "no_such_channel",
            Self::TooLarge => "too_large",
        }
    }
}

/// Install the Prometheus exporter on `port` and describe every metric.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the listener
/// cannot be set up.
pub fn install(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!(CONNECTIONS_TOTAL, "WebSocket sessions accepted since start");
    describe_gauge!(CONNECTIONS_OPEN, "WebSocket sessions currently open");
    describe_gauge!(CHANNELS, "Channels currently registered");
    describe_counter!(PUBLISHES_TOTAL, "Publish requests by outcome");
    describe_counter!(SUBSCRIPTIONS_TOTAL, "Subscriptions opened since start");
    describe_counter!(OUTBOUND_FRAMES_TOTAL, "Frames written to clients");
    describe_counter!(OUTBOUND_BYTES_TOTAL, "Encoded bytes written to clients");
    describe_histogram!(
        BATCH_SECONDS,
        "Time to handle every frame in one inbound WebSocket message"
    );
    describe_counter!(ERRORS_TOTAL, "Session errors by kind");

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

pub fn publish(outcome: PublishOutcome) {
    counter!(PUBLISHES_TOTAL, "outcome" => outcome.label()).increment(1);
}

pub fn subscription_opened() {
    counter!(SUBSCRIPTIONS_TOTAL).increment(1);
}

pub fn channel_count(count: usize) {
    gauge!(CHANNELS).set(count as f64);
}

pub fn frame_sent(bytes: usize) {
    counter!(OUTBOUND_FRAMES_TOTAL).increment(1);
    counter!(OUTBOUND_BYTES_TOTAL).increment(bytes as u64);
}

pub fn inbound_batch(elapsed: Duration) {
    histogram!(BATCH_SECONDS).record(elapsed.as_secs_f64());
}

/// Count a session error; `kind` becomes the `kind` label.
pub fn error(kind: &'static str) {
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Counts a session as open for as long as it lives.
pub struct OpenConnection(());

impl OpenConnection {
    #[must_use]
    pub fn track() -> Self {
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_OPEN).increment(1.0);
        Self(())
    }
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        gauge!(CONNECTIONS_OPEN).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        let _open = OpenConnection::track();
        publish(PublishOutcome::Accepted);
        subscription_opened();
        channel_count(3);
        frame_sent(12);
        inbound_batch(Duration::from_micros(40));
        error("decode");
    }

    #[test]
    fn test_publish_labels() {
        assert_eq!(PublishOutcome::Accepted.label(), "accepted");
        assert_eq!(PublishOutcome::NoSuchChannel.label(), "no_such_channel");
        assert_eq!(PublishOutcome::TooLarge.label(), "too_large");
    }
}
