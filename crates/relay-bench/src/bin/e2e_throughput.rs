//! End-to-end throughput benchmark for Relay.
//!
//! This benchmark measures actual event-stream throughput with real network
//! I/O: N subscribers hold open `GET` streams while publishers `POST` as fast
//! as the server acknowledges.
//!
//! ```bash
//! cargo run --release -p tenvis-relay-bench --bin e2e_throughput -- 16 2
//! ```

use bytes::BytesMut;
use futures_util::StreamExt;
use relay_protocol::{codec, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

const SERVER_URL: &str = "http://127.0.0.1:4322/api/message";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_subscribers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let num_publishers = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);
    let url = std::env::var("RELAY_URL").unwrap_or_else(|_| SERVER_URL.to_string());

    println!("Relay end-to-end throughput benchmark");
    println!("  Server: {} (start it with: cargo run --release -p tenvis-relay-server)", url);
    println!(
        "  Subscribers: {}, publishers: {}",
        num_subscribers, num_publishers
    );
    println!("  Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    run_benchmark(&url, num_subscribers, num_publishers).await;
}

async fn run_benchmark(url: &str, num_subscribers: usize, num_publishers: usize) {
    let client = reqwest::Client::new();
    let received = Arc::new(AtomicU64::new(0));
    let published = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_subscribers + 1));

    let mut handles = Vec::new();

    for subscriber_id in 0..num_subscribers {
        let client = client.clone();
        let url = url.to_string();
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_subscriber(&client, &url, received, barrier).await {
                eprintln!("Subscriber {} error: {}", subscriber_id, e);
            }
        }));
    }

    // Wait for every stream to be open before publishing
    barrier.wait().await;
    println!("All {} subscribers started", num_subscribers);

    for publisher_id in 0..num_publishers {
        let client = client.clone();
        let url = url.to_string();
        let published = Arc::clone(&published);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_publisher(&client, &url, published).await {
                eprintln!("Publisher {} error: {}", publisher_id, e);
            }
        }));
    }

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    published.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_received = received.load(Ordering::SeqCst);
    let total_published = published.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  Duration:           {:>12.2}s", elapsed);
    println!("  Published:          {:>12} msg", total_published);
    println!("  Delivered frames:   {:>12}", total_received);
    println!(
        "  Publish rate:       {:>12.0} msg/s",
        total_published as f64 / elapsed
    );
    println!(
        "  Delivery rate:      {:>12.0} frames/s",
        total_received as f64 / elapsed
    );
    if total_published > 0 && num_subscribers > 0 {
        let expected = total_published * num_subscribers as u64;
        println!(
            "  Delivery ratio:     {:>12.1}%",
            total_received as f64 * 100.0 / expected as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_subscriber(
    client: &reqwest::Client,
    url: &str,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let connected = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status);
    // A failed connect still releases the start barrier
    barrier.wait().await;
    let response = connected?;

    let mut stream = response.bytes_stream();
    let mut buf = BytesMut::with_capacity(65536);

    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
        while let Some(_message) = codec::decode_from(&mut buf)? {
            received.fetch_add(1, Ordering::Relaxed);
        }
    }

    Ok(())
}

async fn run_publisher(
    client: &reqwest::Client,
    url: &str,
    published: Arc<AtomicU64>,
) -> Result<(), BoxError> {
    let message = Message::new("benchmark", "e2e throughput")
        .with_data(serde_json::json!({ "blob": "x".repeat(64) }));

    loop {
        client
            .post(url)
            .json(&message)
            .send()
            .await?
            .error_for_status()?;
        published.fetch_add(1, Ordering::Relaxed);
    }
}
