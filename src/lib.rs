//! # Rex WebSocket Client
//!
//! A minimal client for a single outbound WebSocket connection exchanging
//! binary frames. [`WsClient`] parses the target URI, connects over TCP,
//! performs the upgrade handshake and reports connect, receive and close
//! events to a [`WsClientHandler`] running on a background I/O thread.
//!
//! ```no_run
//! use rex_ws_client::{ChannelHandler, WsClient, WsEvent};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (handler, events) = ChannelHandler::new();
//! let client = WsClient::new();
//! client.set_sub_protocol("echo").set_callback(handler);
//! client.start("ws://127.0.0.1:9001/")?;
//!
//! if let Ok(WsEvent::Connected) = events.recv() {
//!     client.send(b"ping".to_vec());
//! }
//! client.stop();
//! # Ok(())
//! # }
//! ```
//!
//! TLS is not supported: `wss` targets are accepted and default to port 443,
//! but the connection is made in plaintext.

mod websocket;
mod error;

pub use websocket::*;
pub use error::{WsClientError, WsResult};
