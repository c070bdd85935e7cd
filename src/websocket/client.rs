use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::thread::{self, JoinHandle};
use crossbeam_channel::{unbounded, Sender};
use crate::error::{WsClientError, WsResult};
use super::connection::{self, Control, ConnectionTask};
use super::options::ClientOptions;
use super::target::{ConnectTarget, Scheme};
use super::types::WsClientHandler;

// ============================================================================
// WsClient - single-connection client with handler callbacks
// ============================================================================

/// A handle to one outbound WebSocket connection.
///
/// The client starts idle. [`start`](Self::start) validates the target, opens
/// the TCP connection and hands it to a background I/O thread that performs the
/// upgrade handshake and delivers events to the registered
/// [`WsClientHandler`]. [`stop`](Self::stop) closes the connection and waits
/// for the I/O thread to finish, after which the client may be started again.
///
/// `WsClient` is cheap to clone; all clones refer to the same connection.
/// Callbacks run on the I/O thread and receive a handle to the client.
///
/// ```no_run
/// use rex_ws_client::{CloseReason, WsClient, WsClientHandler};
///
/// struct Printer;
///
/// impl WsClientHandler for Printer {
///     fn on_connected(&self, client: &WsClient) {
///         client.send(vec![0x01, 0x02, 0x03]);
///     }
///     fn on_received(&self, _client: &WsClient, data: &[u8]) {
///         println!("received {:?}", data);
///     }
///     fn on_closed(&self, _client: &WsClient, reason: CloseReason) {
///         println!("{}", reason);
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = WsClient::new();
/// client.set_callback(Printer).start("ws://127.0.0.1:9001/")?;
/// // ...
/// client.stop();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    options: ClientOptions,
    // Serializes start/stop. Held across the join in `stop`.
    lifecycle: Mutex<()>,
    connection: Mutex<Option<Connection>>,
    handler: RwLock<Option<Arc<dyn WsClientHandler>>>,
    sub_protocol: Mutex<Option<String>>,
    next_connection_id: AtomicU64,
}

struct Connection {
    id: u64,
    control_tx: Sender<Control>,
    join_handle: JoinHandle<()>,
}

impl Connection {
    fn request_close(&self) {
        if self.control_tx.send(Control::Close).is_err() {
            tracing::trace!("Connection {} already finished", self.id);
        }
    }
}

impl Default for WsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl WsClient {
    /// Creates an idle client with default options.
    pub fn new() -> WsClient {
        Self::with_options(ClientOptions::default())
    }

    pub fn with_options(options: ClientOptions) -> WsClient {
        tracing::trace!("<init>");
        WsClient {
            inner: Arc::new(ClientInner {
                options,
                lifecycle: Mutex::new(()),
                connection: Mutex::new(None),
                handler: RwLock::new(None),
                sub_protocol: Mutex::new(None),
                next_connection_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> WsClient {
        WsClient { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<ClientInner> {
        &self.inner
    }

    /// Connects to `uri` and starts the background I/O thread.
    ///
    /// Blocks until the TCP connect resolves. The upgrade handshake completes
    /// asynchronously and is reported through `on_connected`, or through
    /// `on_closed` if it fails.
    ///
    /// Calling `start` on a started client is a no-op. Invalid targets are
    /// rejected before any network activity.
    pub fn start(&self, uri: &str) -> WsResult<&Self> {
        tracing::trace!("start uri:<{}>", uri);
        let _lifecycle = self.lock_lifecycle()?;
        if self.is_started() {
            tracing::warn!("already started");
            return Ok(self);
        }

        let target = ConnectTarget::parse(uri)?;
        if target.scheme() == Scheme::Wss {
            tracing::warn!("TLS is not supported, connecting to {} without encryption", target);
        }

        let options = &self.inner.options;
        let stream = connection::open_stream(&target, options)?;
        let sub_protocol = self.sub_protocol();
        let request = connection::build_request(&target, sub_protocol.as_deref(), &options.headers)?;

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = unbounded::<Control>();
        let task = ConnectionTask::new(Arc::downgrade(&self.inner), id, target, control_rx, options.clone());

        // Hold the slot while spawning so the I/O thread cannot try to release
        // the connection before it has been registered.
        let mut slot = self.inner.lock_connection();
        let join_handle = thread::Builder::new()
            .name("ws-client-io".to_string())
            .spawn(move || task.run(stream, request))?;
        *slot = Some(Connection { id, control_tx, join_handle });

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Started connection {}", id);
        }
        Ok(self)
    }

    /// Closes the connection and waits until it has terminated.
    ///
    /// `on_closed` has been delivered by the time this returns. Called from
    /// inside one of this client's own callbacks, `stop` only requests the
    /// close and returns at once; `on_closed` then follows on the I/O thread.
    pub fn stop(&self) -> &Self {
        tracing::trace!("stop");
        if connection::on_io_thread_of(&self.inner) {
            match self.inner.lock_connection().as_ref() {
                Some(connection) => connection.request_close(),
                None => tracing::warn!("not started"),
            }
            return self;
        }

        let _lifecycle = self.inner.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let connection = self.inner.lock_connection().take();
        match connection {
            Some(connection) => {
                connection.request_close();
                if connection.join_handle.join().is_err() {
                    tracing::error!("I/O thread of connection {} panicked", connection.id);
                }
                if tracing::enabled!(tracing::Level::DEBUG) {
                    tracing::debug!("Stopped connection {}", connection.id);
                }
            }
            None => tracing::warn!("not started"),
        }
        self
    }

    /// Queues `data` to be sent as one binary frame.
    ///
    /// Fire-and-forget: frames are written in the order they were queued, but
    /// delivery is not confirmed. When the client is not started the data is
    /// dropped with a warning.
    pub fn send(&self, data: impl Into<Vec<u8>>) {
        let control_tx = match self.inner.lock_connection().as_ref() {
            Some(connection) => connection.control_tx.clone(),
            None => {
                tracing::warn!("not started");
                return;
            }
        };

        let data = data.into();
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("data:{}", data.len());
        }
        if control_tx.send(Control::Send(data)).is_err() {
            tracing::warn!("connection terminated, dropping frame");
        }
    }

    /// Registers the handler for all subsequent events, replacing any previous one.
    pub fn set_callback<H: WsClientHandler>(&self, handler: H) -> &Self {
        let handler: Arc<dyn WsClientHandler> = Arc::new(handler);
        *self.inner.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        self
    }

    /// Removes the handler; events are dropped until a new one is set.
    pub fn clear_callback(&self) -> &Self {
        *self.inner.handler.write().unwrap_or_else(PoisonError::into_inner) = None;
        self
    }

    /// Sets the sub-protocol requested in the upgrade handshake.
    /// Takes effect on the next `start`.
    pub fn set_sub_protocol(&self, sub_protocol: impl Into<String>) -> &Self {
        *self.inner.sub_protocol.lock().unwrap_or_else(PoisonError::into_inner) = Some(sub_protocol.into());
        self
    }

    /// Returns `true` between a successful `start` and the end of that connection.
    pub fn is_started(&self) -> bool {
        self.inner.lock_connection().is_some()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn WsClientHandler>> {
        self.inner.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn sub_protocol(&self) -> Option<String> {
        self.inner.sub_protocol.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock_lifecycle(&self) -> WsResult<MutexGuard<'_, ()>> {
        if !connection::on_io_thread_of(&self.inner) {
            return Ok(self.inner.lifecycle.lock().unwrap_or_else(PoisonError::into_inner));
        }
        // A callback must not wait for a stop that is joining its own thread.
        match self.inner.lifecycle.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!("lifecycle change already in progress");
                Err(WsClientError::Busy)
            }
        }
    }
}

impl ClientInner {
    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the client to idle once connection `id` has terminated on its own.
    pub(crate) fn release_connection(&self, id: u64) {
        let mut slot = self.lock_connection();
        if slot.as_ref().is_some_and(|connection| connection.id == id) {
            // Dropping the handle detaches the finishing thread.
            slot.take();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(connection) = self.lock_connection().take() {
            tracing::trace!("Client dropped, closing connection {}", connection.id);
            connection.request_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::types::ChannelHandler;

    #[test]
    fn new_client_is_idle() {
        let client = WsClient::new();
        assert!(!client.is_started());
    }

    #[test]
    fn stop_before_start_is_noop() {
        let (handler, events) = ChannelHandler::new();
        let client = WsClient::new();
        client.set_callback(handler).stop().stop();
        assert!(!client.is_started());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn send_before_start_is_dropped() {
        let client = WsClient::new();
        client.send(vec![1u8, 2, 3]);
        assert!(!client.is_started());
    }

    #[test]
    fn invalid_scheme_does_not_start() {
        let (handler, events) = ChannelHandler::new();
        let client = WsClient::new();
        client.set_callback(handler);

        let err = client.start("http://127.0.0.1:1/").err().unwrap();
        assert!(matches!(err, WsClientError::UnsupportedScheme(_)));
        assert!(!client.is_started());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn setters_chain() {
        let (handler, _events) = ChannelHandler::new();
        let client = WsClient::new();
        client.set_sub_protocol("chat").set_callback(handler).clear_callback();
        assert_eq!(client.sub_protocol().as_deref(), Some("chat"));
        assert!(client.handler().is_none());
    }

    #[test]
    fn clones_share_state() {
        let client = WsClient::new();
        let other = client.clone();
        client.set_sub_protocol("v2");
        assert_eq!(other.sub_protocol().as_deref(), Some("v2"));
    }
}
