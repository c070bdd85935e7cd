use std::collections::HashMap;
use std::time::Duration;
use tungstenite::protocol::WebSocketConfig;
use crate::error::{WsClientError, WsResult};

// ============================================================================
// Configuration options
// ============================================================================

/// Upper bound for a single message and a single frame, in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1 << 16;

/// Read timeout used by the I/O loop between checks of the outbound queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration options for [`WsClient`](crate::WsClient).
///
/// All timeouts default to `None`, meaning `start` and `stop` may block for as
/// long as the peer takes.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) handshake_timeout: Option<Duration>,
    pub(crate) close_timeout: Option<Duration>,
    pub(crate) poll_interval: Duration,
    pub(crate) nodelay: Option<bool>,
    pub(crate) ttl: Option<u32>,
    pub(crate) keepalive: bool,
    pub(crate) max_message_size: usize,
    pub(crate) headers: HashMap<String, String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            connect_timeout: None,
            handshake_timeout: None,
            close_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            nodelay: None,
            ttl: None,
            keepalive: true,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            headers: HashMap::new(),
        }
    }
}

impl ClientOptions {
    /// Creates a new `ClientOptions` builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds the TCP connect performed by `start`.
    /// Must be None to wait indefinitely or greater than zero.
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> WsResult<Self> {
        self.connect_timeout = non_zero(timeout, "Connect timeout")?;
        Ok(self)
    }

    /// Bounds the upgrade handshake that follows the TCP connect.
    /// Must be None to wait indefinitely or greater than zero.
    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> WsResult<Self> {
        self.handshake_timeout = non_zero(timeout, "Handshake timeout")?;
        Ok(self)
    }

    /// Bounds how long the close handshake may take once a close was requested.
    /// Must be None to wait indefinitely or greater than zero.
    pub fn close_timeout(mut self, timeout: Option<Duration>) -> WsResult<Self> {
        self.close_timeout = non_zero(timeout, "Close timeout")?;
        Ok(self)
    }

    /// Sets the socket read timeout the I/O thread uses between checks for
    /// outbound frames and close requests. Lower values reduce send latency
    /// at the cost of more wakeups.
    pub fn poll_interval(mut self, interval: Duration) -> WsResult<Self> {
        if interval.is_zero() {
            return Err(WsClientError::InvalidConfiguration("Poll interval cannot be zero".to_string()));
        }
        self.poll_interval = interval;
        Ok(self)
    }

    /// Enables or disables the `TCP_NODELAY` option for messages to be sent.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = Some(nodelay);
        self
    }

    /// Sets the TTL (Time To Live, # of hops) for the socket.
    /// None for the system default
    pub fn ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enables or disables `SO_KEEPALIVE` on the socket. Enabled by default.
    pub fn keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Sets the largest inbound message and frame accepted, in bytes.
    pub fn max_message_size(mut self, size: usize) -> WsResult<Self> {
        if size == 0 {
            return Err(WsClientError::InvalidConfiguration("Max message size cannot be zero".to_string()));
        }
        self.max_message_size = size;
        Ok(self)
    }

    /// Adds a header to the upgrade request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

fn non_zero(timeout: Option<Duration>, name: &str) -> WsResult<Option<Duration>> {
    match timeout {
        Some(timeout) if timeout.is_zero() => {
            Err(WsClientError::InvalidConfiguration(format!("{} duration cannot be zero", name)))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_aggregation_limit() {
        let options = ClientOptions::new();
        assert_eq!(options.max_message_size, 65536);
        assert_eq!(options.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(options.connect_timeout.is_none());
        assert!(options.handshake_timeout.is_none());
        assert!(options.close_timeout.is_none());
        assert!(options.keepalive);
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(ClientOptions::new().connect_timeout(Some(Duration::ZERO)).is_err());
        assert!(ClientOptions::new().handshake_timeout(Some(Duration::ZERO)).is_err());
        assert!(ClientOptions::new().close_timeout(Some(Duration::ZERO)).is_err());
        assert!(ClientOptions::new().poll_interval(Duration::ZERO).is_err());
        assert!(ClientOptions::new().max_message_size(0).is_err());
    }

    #[test]
    fn none_clears_a_timeout() {
        let options = ClientOptions::new()
            .close_timeout(Some(Duration::from_secs(1)))
            .and_then(|o| o.close_timeout(None))
            .unwrap();
        assert!(options.close_timeout.is_none());
        assert!(options.keepalive);
    }

    #[test]
    fn builder_collects_settings() {
        let options = ClientOptions::new()
            .connect_timeout(Some(Duration::from_secs(2)))
            .unwrap()
            .nodelay(true)
            .ttl(Some(32))
            .keepalive(false)
            .header("Authorization", "Bearer abc")
            .max_message_size(1024)
            .unwrap();
        assert_eq!(options.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(options.nodelay, Some(true));
        assert_eq!(options.ttl, Some(32));
        assert!(!options.keepalive);
        assert_eq!(options.headers.get("Authorization").map(String::as_str), Some("Bearer abc"));
        assert_eq!(options.max_message_size, 1024);
    }
}
