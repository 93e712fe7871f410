//! End-to-end fan-out benchmark for chatline.
//!
//! Starts an in-process live-update listener, connects N authenticated
//! clients to one channel over real TCP, publishes M messages and measures
//! how long it takes until every client has acknowledged all of them.
//!
//! ```bash
//! cargo run --release --bin e2e_fanout -- 32 2000
//! ```

use chatline_core::{Message, PresenceEvent};
use chatline_server::{Acceptor, ChatClient, Hub, Push, SessionConfig};
use chatline_transport::{LineConnection, TcpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Barrier};
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "benchmark";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let num_messages: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1000);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Chatline End-to-End Fan-out Benchmark               ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let transport = TcpTransport::bind("127.0.0.1:0".parse()?).await?;
    let addr = transport
        .local_addr()
        .ok_or("Live-update listener has no local address")?;
    let hub = Arc::new(Hub::new());
    let cancel = CancellationToken::new();

    let (online_tx, mut online_rx) = mpsc::unbounded_channel();
    let presence = hub.presence.subscribe(move |event: &PresenceEvent| {
        if let PresenceEvent::Online(_) = event {
            let _ = online_tx.send(());
        }
    });

    let acceptor = Acceptor::new(transport, hub.clone(), SessionConfig::default(), cancel.clone());
    let server = tokio::spawn(acceptor.run());

    println!("📊 Fan-out: {} clients, {} messages", num_clients, num_messages);

    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let mut handles = Vec::with_capacity(num_clients);
    for client_id in 0..num_clients {
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            run_client(client_id, addr, num_messages, barrier).await
        }));
    }

    for _ in 0..num_clients {
        online_rx.recv().await.ok_or("Presence events stopped")?;
    }
    drop(presence);
    println!("✓ All {} clients authenticated", num_clients);

    barrier.wait().await;
    let start = Instant::now();
    for i in 0..num_messages {
        hub.bus.publish(CHANNEL, Message::new("bench", format!("message {i}"), ""));
    }

    let mut slowest = Duration::ZERO;
    let mut failures = 0usize;
    for handle in handles {
        match handle.await? {
            Ok(elapsed) => slowest = slowest.max(elapsed),
            Err(e) => {
                failures += 1;
                eprintln!("Client error: {}", e);
            }
        }
    }
    let elapsed = start.elapsed();

    cancel.cancel();
    server.await?;

    let deliveries = (num_clients - failures) * num_messages;
    let per_sec = deliveries as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Clients:              {:>10}                           ║", num_clients);
    println!("║  Failed clients:       {:>10}                           ║", failures);
    println!("║  Messages:             {:>10}                           ║", num_messages);
    println!("║  Acked deliveries:     {:>10}                           ║", deliveries);
    println!("║  Duration:             {:>10.2}s                          ║", elapsed.as_secs_f64());
    println!("║  Slowest client:       {:>10.2}s                          ║", slowest.as_secs_f64());
    println!("║  Throughput:           {:>10.0} acks/s                   ║", per_sec);
    println!("╚══════════════════════════════════════════════════════════════╝");

    Ok(())
}

/// Connect, authenticate, then ack pushes until `expected` messages arrived.
async fn run_client(
    client_id: usize,
    addr: SocketAddr,
    expected: usize,
    barrier: Arc<Barrier>,
) -> Result<Duration, BoxError> {
    let stream = TcpStream::connect(addr).await?;
    let mut client = ChatClient::new(Box::new(LineConnection::from_tcp(stream)));
    let keys = chatline_crypto::generate_key_pair();
    client
        .handshake(&format!("client-{client_id}"), &keys, CHANNEL)
        .await?;

    barrier.wait().await;
    let start = Instant::now();

    let mut received = 0;
    while received < expected {
        if let Push::Message(_) = client.recv_push().await? {
            received += 1;
        }
    }
    Ok(start.elapsed())
}
