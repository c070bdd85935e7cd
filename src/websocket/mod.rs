// Public API modules
pub mod types;
pub mod options;
pub mod target;

// Internal modules
mod connection;

// Client implementation
mod client;

// Re-export public types
pub use types::{ChannelHandler, CloseReason, WsClientHandler, WsEvent};
pub use options::{ClientOptions, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_POLL_INTERVAL};
pub use target::{ConnectTarget, Scheme};

// Re-export client type
pub use client::WsClient;
