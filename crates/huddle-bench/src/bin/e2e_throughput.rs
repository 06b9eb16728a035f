//! End-to-end throughput benchmark for Huddle.
//!
//! Connects N WebSocket clients to a running server and has each of them chat
//! as fast as it can. Every message is broadcast to every client, so the
//! server delivers roughly N times what it receives. Clients that fall behind
//! are evicted by the room and counted as dropped.

use futures_util::{SinkExt, StreamExt};
use huddle_protocol::ChatMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/room";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    println!("Huddle end-to-end throughput benchmark");
    println!("  server:  {}", url);
    println!("  clients: {}", num_clients);
    println!("  warmup {}s, measurement {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let counters = Arc::new(Counters::default());
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let counters = Arc::clone(&counters);
        let barrier = Arc::clone(&barrier);
        let url = url.clone();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, &url, &counters, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;
    counters.sent.store(0, Ordering::SeqCst);
    counters.received.store(0, Ordering::SeqCst);

    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    let elapsed = start.elapsed().as_secs_f64();

    let sent = counters.sent.load(Ordering::SeqCst);
    let received = counters.received.load(Ordering::SeqCst);

    println!();
    println!("Results");
    println!("  duration:   {:>12.2} s", elapsed);
    println!("  sent:       {:>12} ({:.0} msg/s)", sent, sent as f64 / elapsed);
    println!(
        "  delivered:  {:>12} ({:.0} msg/s)",
        received,
        received as f64 / elapsed
    );
    println!(
        "  dropped:    {:>12} clients",
        counters.dropped.load(Ordering::SeqCst)
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    counters: &Arc<Counters>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    let envelope = ChatMessage::new(format!("load from client {}", client_id)).encode()?;
    let text = String::from_utf8(envelope.to_vec())?;

    let recv_counters = Arc::clone(counters);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if message.is_text() || message.is_binary() {
                recv_counters.received.fetch_add(1, Ordering::Relaxed);
            }
        }
        // the room closes the socket of a client it evicted
        recv_counters.dropped.fetch_add(1, Ordering::Relaxed);
    });

    loop {
        if sender.send(Message::Text(text.clone())).await.is_err() {
            break;
        }
        counters.sent.fetch_add(1, Ordering::Relaxed);
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
