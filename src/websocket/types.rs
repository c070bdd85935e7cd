use std::fmt;
use std::sync::Arc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use super::client::WsClient;

// ============================================================================
// Macros
// ============================================================================

macro_rules! send_or_log {
    ($sender:expr, $context:expr, $event:expr) => {
        if let Err(e) = $sender.send($event) {
            tracing::error!("Failed to send context {} through channel: {}", $context, e);
        }
    };
}

// ============================================================================
// Public API Types
// ============================================================================

/// Receives connection lifecycle events for a [`WsClient`].
///
/// Every method is invoked on the client's background I/O thread, never on the
/// thread that called `start`. Implementations must therefore be `Send + Sync`;
/// use [`ChannelHandler`] to move events onto a thread of your choosing.
///
/// The `client` argument is a handle to the client the event belongs to, so
/// handlers may call [`WsClient::send`] or [`WsClient::stop`] from within a
/// callback.
pub trait WsClientHandler: Send + Sync + 'static {
    /// The upgrade handshake completed. Fired at most once per connection and
    /// always before the first `on_received`.
    fn on_connected(&self, client: &WsClient) {
        // Default: noop
        let _ = client;
    }

    /// One inbound binary frame. Text and control frames are not surfaced.
    fn on_received(&self, client: &WsClient, data: &[u8]);

    /// The connection ended. Fired exactly once per connection, whatever the cause.
    fn on_closed(&self, client: &WsClient, reason: CloseReason);
}

impl<H: WsClientHandler + ?Sized> WsClientHandler for Arc<H> {
    fn on_connected(&self, client: &WsClient) {
        (**self).on_connected(client)
    }

    fn on_received(&self, client: &WsClient, data: &[u8]) {
        (**self).on_received(client, data)
    }

    fn on_closed(&self, client: &WsClient, reason: CloseReason) {
        (**self).on_closed(client, reason)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed by this side through `stop` or by dropping every client handle.
    Local,
    /// The peer started the close handshake, optionally giving a reason.
    Remote(Option<String>),
    /// Handshake failure, transport error or protocol violation.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::Remote(Some(reason)) => write!(f, "closed by peer: {}", reason),
            CloseReason::Remote(None) => write!(f, "closed by peer"),
            CloseReason::Error(error) => write!(f, "closed on error: {}", error),
        }
    }
}

/// Client events as delivered by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Connected,
    Received(Vec<u8>),
    Closed(CloseReason),
}

/// A handler that forwards every event into a channel.
///
/// ```no_run
/// use rex_ws_client::{ChannelHandler, WsClient, WsEvent};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let (handler, events) = ChannelHandler::new();
/// let client = WsClient::new();
/// client.set_callback(handler).start("ws://127.0.0.1:9001/")?;
/// client.send(vec![1u8, 2, 3]);
/// while let Ok(event) = events.recv() {
///     if let WsEvent::Closed(reason) = event {
///         println!("closed: {}", reason);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    event_tx: Sender<WsEvent>,
}

impl ChannelHandler {
    /// Creates a handler together with the receiving end of its channel.
    pub fn new() -> (ChannelHandler, Receiver<WsEvent>) {
        let (event_tx, event_rx) = unbounded::<WsEvent>();
        (ChannelHandler { event_tx }, event_rx)
    }

    /// Wraps an existing sender, e.g. to merge several clients into one queue.
    pub fn with_sender(event_tx: Sender<WsEvent>) -> ChannelHandler {
        ChannelHandler { event_tx }
    }
}

impl WsClientHandler for ChannelHandler {
    fn on_connected(&self, _client: &WsClient) {
        send_or_log!(self.event_tx, "WsEvent::Connected", WsEvent::Connected);
    }

    fn on_received(&self, _client: &WsClient, data: &[u8]) {
        send_or_log!(self.event_tx, "WsEvent::Received", WsEvent::Received(data.to_vec()));
    }

    fn on_closed(&self, _client: &WsClient, reason: CloseReason) {
        send_or_log!(self.event_tx, "WsEvent::Closed", WsEvent::Closed(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_handler_forwards_events_in_order() {
        let (handler, events) = ChannelHandler::new();
        let client = WsClient::new();

        handler.on_connected(&client);
        handler.on_received(&client, &[1, 2, 3]);
        handler.on_closed(&client, CloseReason::Local);

        assert_eq!(events.try_recv(), Ok(WsEvent::Connected));
        assert_eq!(events.try_recv(), Ok(WsEvent::Received(vec![1, 2, 3])));
        assert_eq!(events.try_recv(), Ok(WsEvent::Closed(CloseReason::Local)));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn channel_handler_tolerates_dropped_receiver() {
        let (handler, events) = ChannelHandler::new();
        drop(events);
        handler.on_received(&WsClient::new(), &[0xff]);
    }

    #[test]
    fn arc_handler_delegates() {
        let (handler, events) = ChannelHandler::new();
        let shared = Arc::new(handler);
        shared.on_closed(&WsClient::new(), CloseReason::Remote(Some("bye".into())));
        assert_eq!(events.try_recv(), Ok(WsEvent::Closed(CloseReason::Remote(Some("bye".into())))));
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::Local.to_string(), "closed locally");
        assert_eq!(CloseReason::Remote(None).to_string(), "closed by peer");
        assert_eq!(CloseReason::Error("reset".into()).to_string(), "closed on error: reset");
    }
}
