//! End-to-end throughput benchmark for Courier.
//!
//! Every client subscribes to one multiple channel and publishes to it as
//! fast as it can, pulling one queued message back after each publish so the
//! channel queue stays bounded. Reported throughput counts pushed
//! `message` frames received across all clients.
//!
//! Usage: `e2e_throughput [clients] [url]` against a running server.

use bytes::BytesMut;
use courier_protocol::{codec, ChannelType, Frame};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:9090/ws";
const CHANNEL: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Courier end-to-end throughput");
    println!("  server:  {}", url);
    println!("  clients: {}", num_clients);
    println!("  warmup {}s, measure {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let received = Arc::clone(&received);
            let barrier = Arc::clone(&barrier);
            let url = url.clone();
            tokio::spawn(async move {
                if let Err(e) = run_client(&url, received, barrier).await {
                    eprintln!("Client {} error: {}", client_id, e);
                }
            })
        })
        .collect();

    barrier.wait().await;
    println!("All {} clients set up", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total = received.load(Ordering::SeqCst);
    println!();
    println!("  delivered: {}", total);
    println!("  elapsed:   {:.2}s", elapsed);
    println!("  rate:      {:.0} msg/s", total as f64 / elapsed);
    println!(
        "  per client {:.0} msg/s",
        total as f64 / elapsed / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    // Reach the barrier even when setup fails.
    let setup = async {
        let (ws, _) = connect_async(url).await?;
        let (mut sender, mut receiver) = ws.split();

        // Connected
        receiver.next().await;

        // One client wins the create; the rest get `false`.
        let create = codec::encode(&Frame::create_channel(1, CHANNEL, ChannelType::Multiple))?;
        sender.send(Message::Binary(create.to_vec())).await?;
        receiver.next().await;

        let subscribe = codec::encode(&Frame::subscribe(2, CHANNEL))?;
        sender.send(Message::Binary(subscribe.to_vec())).await?;
        receiver.next().await;

        Ok::<_, BoxError>((sender, receiver))
    }
    .await;
    barrier.wait().await;
    let (mut sender, mut receiver) = setup?;

    let mut batch = BytesMut::new();
    batch.extend_from_slice(&codec::encode(&Frame::publish(3, CHANNEL, vec![0u8; 64]))?);
    batch.extend_from_slice(&codec::encode(&Frame::get_message(4, CHANNEL, 0))?);
    let batch = Message::Binary(batch.to_vec());

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(Message::Binary(data))) = receiver.next().await {
            if let Ok(Frame::Message { .. }) = codec::decode(&data) {
                received.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    while sender.send(batch.clone()).await.is_ok() {
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
