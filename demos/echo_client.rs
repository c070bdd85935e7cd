//! Echo client example using handler callbacks.
//!
//! Connects to a WebSocket echo server, sends a few binary messages from the
//! callback thread and stops once every echo has come back.
//!
//! Usage: `cargo run --example echo_client -- ws://127.0.0.1:9001/`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use rex_ws_client::{ClientOptions, CloseReason, WsClient, WsClientHandler};

const MESSAGES: usize = 3;

struct EchoHandler {
    received: AtomicUsize,
    done_tx: mpsc::SyncSender<()>,
}

impl WsClientHandler for EchoHandler {
    fn on_connected(&self, client: &WsClient) {
        println!("Connected, sending {} messages", MESSAGES);
        for i in 0..MESSAGES {
            client.send(vec![i as u8; i + 1]);
        }
    }

    fn on_received(&self, _client: &WsClient, data: &[u8]) {
        println!("Received binary message: {:?}", data);
        if self.received.fetch_add(1, Ordering::SeqCst) + 1 == MESSAGES {
            self.done_tx.try_send(()).ok();
        }
    }

    fn on_closed(&self, _client: &WsClient, reason: CloseReason) {
        println!("Connection {}", reason);
        self.done_tx.try_send(()).ok();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let uri = std::env::args().nth(1).unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());

    let options = ClientOptions::new()
        .connect_timeout(Some(Duration::from_secs(5)))?
        .close_timeout(Some(Duration::from_secs(5)))?
        .nodelay(true);

    let (done_tx, done_rx) = mpsc::sync_channel(1);
    let client = WsClient::with_options(options);
    client.set_callback(EchoHandler { received: AtomicUsize::new(0), done_tx });

    println!("Connecting to {}...", uri);
    client.start(&uri)?;

    // Wait for all echoes or an early close
    done_rx.recv_timeout(Duration::from_secs(10)).ok();

    println!("Closing connection...");
    client.stop();

    println!("Example completed successfully");
    Ok(())
}
