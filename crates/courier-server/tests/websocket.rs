//! End-to-end tests over a real WebSocket connection.

use courier_protocol::{codec, error_codes, ChannelInfo, ChannelType, Frame};
use courier_server::handlers::serve_with_shutdown;
use courier_server::{serve, AppState, Config};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

async fn start_server(configure: impl FnOnce(&mut Config)) -> SocketAddr {
    let mut config = Config::default();
    config.metrics.enabled = false;
    configure(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::new(AppState::new(config))));
    addr
}

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let mut client = Self { ws, next_id: 1 };
        match client.recv().await {
            Frame::Connected { version, .. } => assert_eq!(version, 1),
            other => panic!("Expected Connected, got {:?}", other),
        }
        client
    }

    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn send(&mut self, frame: Frame) {
        let data = codec::encode(&frame).unwrap();
        self.ws.send(Message::Binary(data.to_vec())).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        loop {
            let msg = timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("connection closed")
                .unwrap();
            if let Message::Binary(data) = msg {
                return codec::decode(&data).unwrap();
            }
        }
    }

    async fn request(&mut self, frame: Frame) -> Frame {
        self.send(frame).await;
        self.recv().await
    }

    async fn create(&mut self, name: &str, channel_type: ChannelType) -> bool {
        let id = self.id();
        match self.request(Frame::create_channel(id, name, channel_type)).await {
            Frame::CreateChannelResult { id: rid, success } if rid == id => success,
            other => panic!("Unexpected response {:?}", other),
        }
    }

    async fn publish(&mut self, channel: &str, payload: &[u8]) -> Frame {
        let id = self.id();
        self.request(Frame::publish(id, channel, payload.to_vec())).await
    }

    async fn subscribe(&mut self, channel: &str) -> u64 {
        let id = self.id();
        match self.request(Frame::subscribe(id, channel)).await {
            Frame::Subscribed { id: rid, subscription } if rid == id => subscription,
            other => panic!("Unexpected response {:?}", other),
        }
    }

    async fn list(&mut self) -> Vec<ChannelInfo> {
        let id = self.id();
        match self.request(Frame::list_channels(id)).await {
            Frame::ChannelList { channels, .. } => channels,
            other => panic!("Unexpected response {:?}", other),
        }
    }

    async fn get_message(&mut self, channel: &str) -> Frame {
        let id = self.id();
        self.request(Frame::get_message(id, channel, 250)).await
    }
}

/// Poll until `channel` reports `expected` subscribers.
async fn wait_for_subscribers(client: &mut Client, channel: &str, expected: u64) {
    for _ in 0..100 {
        let count = client
            .list()
            .await
            .into_iter()
            .find(|c| c.name == channel)
            .map(|c| c.subscriber_count);
        if count == Some(expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never reached {} subscribers", channel, expected);
}

#[tokio::test]
async fn test_channel_lifecycle() {
    let addr = start_server(|_| {}).await;
    let mut client = Client::connect(addr).await;

    assert!(client.create("a", ChannelType::Simple).await);
    assert!(!client.create("a", ChannelType::Multiple).await);

    let channels = client.list().await;
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].channel_type, ChannelType::Simple);
    assert_eq!(channels[0].pending_count, 0);

    let id = client.id();
    assert_eq!(
        client.request(Frame::remove_channel(id, "a")).await,
        Frame::RemoveChannelResult { id, success: true }
    );
    let id = client.id();
    assert_eq!(
        client.request(Frame::remove_channel(id, "a")).await,
        Frame::RemoveChannelResult { id, success: false }
    );
    assert!(matches!(
        client.publish("a", b"late").await,
        Frame::PublishResult { success: false, .. }
    ));
}

#[tokio::test]
async fn test_missing_channel_errors() {
    let addr = start_server(|_| {}).await;
    let mut client = Client::connect(addr).await;

    let id = client.id();
    match client.request(Frame::subscribe(id, "nope")).await {
        Frame::Error { id: rid, code, .. } => {
            assert_eq!(rid, id);
            assert_eq!(code, error_codes::CHANNEL_NOT_FOUND);
        }
        other => panic!("Expected error, got {:?}", other),
    }
    assert!(matches!(
        client.get_message("nope").await,
        Frame::Error { code: error_codes::CHANNEL_NOT_FOUND, .. }
    ));
    assert!(matches!(
        client.publish("nope", b"P").await,
        Frame::PublishResult { success: false, .. }
    ));
}

#[tokio::test]
async fn test_pull_fifo() {
    let addr = start_server(|_| {}).await;
    let mut client = Client::connect(addr).await;
    client.create("jobs", ChannelType::Simple).await;

    for body in [&b"1"[..], &b"2"[..], &b"3"[..]] {
        assert!(matches!(
            client.publish("jobs", body).await,
            Frame::PublishResult { success: true, .. }
        ));
    }
    assert_eq!(client.list().await[0].pending_count, 3);

    for expected in [&b"1"[..], &b"2"[..], &b"3"[..]] {
        match client.get_message("jobs").await {
            Frame::GetMessageResult { payload, .. } => {
                assert_eq!(payload.as_deref(), Some(expected));
            }
            other => panic!("Unexpected response {:?}", other),
        }
    }
    assert!(matches!(
        client.get_message("jobs").await,
        Frame::GetMessageResult { payload: None, .. }
    ));
}

#[tokio::test]
async fn test_simple_subscription_is_single_use() {
    let addr = start_server(|_| {}).await;
    let mut consumer = Client::connect(addr).await;
    let mut producer = Client::connect(addr).await;
    producer.create("jobs", ChannelType::Simple).await;

    let subscription = consumer.subscribe("jobs").await;
    producer.publish("jobs", b"P").await;
    producer.publish("jobs", b"Q").await;

    assert_eq!(consumer.recv().await, Frame::message(subscription, b"P".to_vec()));
    assert_eq!(
        consumer.recv().await,
        Frame::subscription_closed(subscription, Some("delivered".to_string()))
    );

    // Both payloads stay queued for pulling.
    let channels = producer.list().await;
    assert_eq!(channels[0].pending_count, 2);
    assert_eq!(channels[0].subscriber_count, 0);
}

#[tokio::test]
async fn test_multiple_broadcast_and_remove() {
    let addr = start_server(|_| {}).await;
    let mut first = Client::connect(addr).await;
    let mut second = Client::connect(addr).await;
    let mut producer = Client::connect(addr).await;
    producer.create("news", ChannelType::Multiple).await;

    let s1 = first.subscribe("news").await;
    let s2 = second.subscribe("news").await;
    producer.publish("news", b"P").await;

    assert_eq!(first.recv().await, Frame::message(s1, b"P".to_vec()));
    assert_eq!(second.recv().await, Frame::message(s2, b"P".to_vec()));

    let id = producer.id();
    producer.request(Frame::remove_channel(id, "news")).await;
    assert_eq!(
        first.recv().await,
        Frame::subscription_closed(s1, Some("channel_removed".to_string()))
    );
    assert_eq!(
        second.recv().await,
        Frame::subscription_closed(s2, Some("channel_removed".to_string()))
    );
}

#[tokio::test]
async fn test_unsubscribe() {
    let addr = start_server(|_| {}).await;
    let mut client = Client::connect(addr).await;
    client.create("news", ChannelType::Multiple).await;
    let subscription = client.subscribe("news").await;

    let id = client.id();
    assert_eq!(
        client.request(Frame::unsubscribe(id, subscription)).await,
        Frame::UnsubscribeResult { id, success: true }
    );
    assert_eq!(
        client.recv().await,
        Frame::subscription_closed(subscription, Some("unsubscribed".to_string()))
    );

    let id = client.id();
    assert!(matches!(
        client.request(Frame::unsubscribe(id, subscription)).await,
        Frame::Error { code: error_codes::UNKNOWN_SUBSCRIPTION, .. }
    ));
}

#[tokio::test]
async fn test_disconnect_detaches_subscriber() {
    let addr = start_server(|_| {}).await;
    let mut producer = Client::connect(addr).await;
    producer.create("jobs", ChannelType::Simple).await;

    let mut gone = Client::connect(addr).await;
    gone.subscribe("jobs").await;
    wait_for_subscribers(&mut producer, "jobs", 1).await;
    drop(gone);
    wait_for_subscribers(&mut producer, "jobs", 0).await;

    let mut consumer = Client::connect(addr).await;
    let subscription = consumer.subscribe("jobs").await;
    producer.publish("jobs", b"P").await;
    assert_eq!(consumer.recv().await, Frame::message(subscription, b"P".to_vec()));
}

#[tokio::test]
async fn test_payload_limit() {
    let addr = start_server(|config| config.channels.max_payload_size = 8).await;
    let mut client = Client::connect(addr).await;
    client.create("jobs", ChannelType::Simple).await;

    assert!(matches!(
        client.publish("jobs", b"0123456789").await,
        Frame::Error { code: error_codes::MESSAGE_TOO_LARGE, .. }
    ));
    assert!(matches!(
        client.publish("jobs", b"01234567").await,
        Frame::PublishResult { success: true, .. }
    ));
    assert_eq!(client.list().await[0].pending_count, 1);
}

#[tokio::test]
async fn test_ping_and_invalid_frames() {
    let addr = start_server(|_| {}).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(
        client.request(Frame::Ping { timestamp: Some(42) }).await,
        Frame::pong(Some(42))
    );

    // Response frames are not valid requests.
    assert!(matches!(
        client.request(Frame::PublishResult { id: 9, success: true }).await,
        Frame::Error { id: 9, code: error_codes::INVALID_FRAME, .. }
    ));

    // Garbage behind a valid length prefix is reported and the session survives.
    let mut garbage = 3u32.to_be_bytes().to_vec();
    garbage.extend_from_slice(&[0xc1, 0xc1, 0xc1]);
    client.ws.send(Message::Binary(garbage)).await.unwrap();
    assert!(matches!(
        client.recv().await,
        Frame::Error { id: 0, code: error_codes::INVALID_FRAME, .. }
    ));
    assert!(client.create("still-alive", ChannelType::Simple).await);
}

#[tokio::test]
async fn test_connection_limit_under_concurrent_connects() {
    let addr = start_server(|config| config.server.max_connections = 1).await;
    let url = format!("ws://{}/ws", addr);

    let attempts: Vec<_> = (0..8)
        .map(|_| tokio::spawn(connect_async(url.clone())))
        .collect();
    let mut accepted = Vec::new();
    for attempt in attempts {
        if let Ok((ws, _)) = attempt.await.unwrap() {
            accepted.push(ws);
        }
    }
    assert_eq!(accepted.len(), 1);

    // The slot comes back once the server sees the disconnect.
    drop(accepted);
    for _ in 0..100 {
        if connect_async(url.clone()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("connection slot was never released");
}

#[tokio::test]
async fn test_graceful_shutdown_closes_sessions() {
    let mut config = Config::default();
    config.metrics.enabled = false;
    let state = Arc::new(AppState::new(config));
    state.registry.create("news", ChannelType::Multiple);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_with_shutdown(
        listener,
        Arc::clone(&state),
        async move {
            let _ = stopped.await;
        },
    ));

    let mut client = Client::connect(addr).await;
    client.subscribe("news").await;
    assert_eq!(state.registry.list()[0].subscriber_count, 1);

    stop.send(()).unwrap();

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match client.ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session was not closed on shutdown");

    timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    for _ in 0..100 {
        if state.registry.list()[0].subscriber_count == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("subscription was not detached on shutdown");
}

#[tokio::test]
async fn test_requests_answered_during_broadcast_flood() {
    let mut config = Config::default();
    config.metrics.enabled = false;
    let state = Arc::new(AppState::new(config));
    state.registry.create("news", ChannelType::Multiple);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, Arc::clone(&state)));

    let mut client = Client::connect(addr).await;
    client.subscribe("news").await;

    let publisher_state = Arc::clone(&state);
    let publisher = tokio::spawn(async move {
        loop {
            publisher_state.registry.publish("news", vec![0u8; 32]);
            let _ = publisher_state.registry.get_message("news", Duration::ZERO);
            tokio::task::yield_now().await;
        }
    });

    let id = client.id();
    client.send(Frame::list_channels(id)).await;
    let answered = timeout(Duration::from_secs(10), async {
        loop {
            match client.recv().await {
                Frame::ChannelList { id: rid, .. } if rid == id => break,
                Frame::Message { .. } => continue,
                other => panic!("Unexpected frame {:?}", other),
            }
        }
    })
    .await;
    publisher.abort();
    assert!(answered.is_ok(), "request starved by subscription traffic");
}
