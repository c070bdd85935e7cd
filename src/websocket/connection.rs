use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use crossbeam_channel::{Receiver, TryRecvError};
use socket2::SockRef;
use tungstenite::handshake::client::Response;
use tungstenite::handshake::HandshakeError;
use tungstenite::http::Uri;
use tungstenite::protocol::CloseFrame;
use tungstenite::{Bytes, ClientRequestBuilder, Error, Message, WebSocket};
use crate::error::{WsClientError, WsResult};
use super::client::{ClientInner, WsClient};
use super::options::ClientOptions;
use super::target::ConnectTarget;
use super::types::{CloseReason, WsClientHandler};

thread_local! {
    // Address of the client whose connection this I/O thread serves, 0 elsewhere.
    static IO_THREAD_OWNER: Cell<usize> = const { Cell::new(0) };
}

fn owner_key(client: *const ClientInner) -> usize {
    client as usize
}

/// Returns `true` when called from the I/O thread of `client`'s own
/// connection, i.e. from one of its callbacks.
pub(crate) fn on_io_thread_of(client: &Arc<ClientInner>) -> bool {
    IO_THREAD_OWNER.with(|owner| owner.get() == owner_key(Arc::as_ptr(client)))
}

/// Requests from client handles to the I/O thread.
pub(crate) enum Control {
    Send(Vec<u8>),
    Close,
}

// ============================================================================
// Connection setup (caller's thread)
// ============================================================================

/// Resolves the target and opens the TCP connection, honouring the connect timeout.
pub(crate) fn open_stream(target: &ConnectTarget, options: &ClientOptions) -> WsResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (target.host(), target.port())
        .to_socket_addrs()
        .map_err(|e| {
            tracing::error!("Failed to resolve {}:{}: {}", target.host(), target.port(), e);
            WsClientError::Io(e)
        })?
        .collect();

    let stream = match options.connect_timeout {
        Some(timeout) => connect_with_timeout(&addrs, timeout),
        None => TcpStream::connect(&addrs[..]).map_err(WsClientError::from),
    }
    .inspect_err(|e| tracing::error!("Failed to connect to {}: {}", target, e))?;

    configure_stream(&stream, options)?;
    Ok(stream)
}

fn connect_with_timeout(addrs: &[SocketAddr], timeout: Duration) -> WsResult<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => last_error = Some(WsClientError::ConnectTimeout),
            Err(e) => last_error = Some(WsClientError::Io(e)),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        WsClientError::Io(io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any address"))
    }))
}

/// Applies socket options. The read timeout doubles as the I/O loop's poll interval.
fn configure_stream(stream: &TcpStream, options: &ClientOptions) -> WsResult<()> {
    if let Some(nodelay) = options.nodelay {
        stream.set_nodelay(nodelay)?;
    }
    if let Some(ttl) = options.ttl {
        stream.set_ttl(ttl)?;
    }
    SockRef::from(stream).set_keepalive(options.keepalive)?;
    stream.set_read_timeout(Some(options.poll_interval))?;
    Ok(())
}

/// Builds the upgrade request with the optional sub-protocol and extra headers.
pub(crate) fn build_request(target: &ConnectTarget, sub_protocol: Option<&str>, headers: &HashMap<String, String>) -> WsResult<ClientRequestBuilder> {
    let request_uri = target.request_uri();
    let uri = Uri::from_str(&request_uri).map_err(|e| {
        tracing::error!("Failed to build request URI <{}>: {}", request_uri, e);
        WsClientError::InvalidUri(e.to_string())
    })?;

    let mut builder = ClientRequestBuilder::new(uri);
    for (key, value) in headers {
        builder = builder.with_header(key, value);
    }
    if let Some(sub_protocol) = sub_protocol {
        builder = builder.with_sub_protocol(sub_protocol);
    }
    Ok(builder)
}

// ============================================================================
// Connection task (I/O thread)
// ============================================================================

enum ReadOutcome {
    Idle,
    Closed,
    Failed(String),
}

/// State owned by the I/O thread of a single connection.
pub(crate) struct ConnectionTask {
    client: Weak<ClientInner>,
    id: u64,
    target: ConnectTarget,
    control_rx: Receiver<Control>,
    options: ClientOptions,
    // Frames queued before the handshake completed.
    pending: VecDeque<Vec<u8>>,
    close_requested_at: Option<Instant>,
}

impl ConnectionTask {
    pub(crate) fn new(client: Weak<ClientInner>, id: u64, target: ConnectTarget, control_rx: Receiver<Control>, options: ClientOptions) -> Self {
        ConnectionTask {
            client,
            id,
            target,
            control_rx,
            options,
            pending: VecDeque::new(),
            close_requested_at: None,
        }
    }

    pub(crate) fn run(mut self, stream: TcpStream, request: ClientRequestBuilder) {
        // The weak reference keeps the allocation, so the address is not reused
        // while this thread runs.
        IO_THREAD_OWNER.with(|owner| owner.set(owner_key(Weak::as_ptr(&self.client))));
        let span = tracing::debug_span!("ws_connection", id = self.id, uri = %self.target);
        let _entered = span.enter();

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Starting event loop");
        }

        let reason = match self.handshake(stream, request) {
            Ok(mut socket) => {
                let reason = self.event_loop(&mut socket);
                close_websocket_with_logging(&mut socket, "on exit");
                reason
            }
            Err(reason) => reason,
        };
        self.finish(reason);
    }

    fn handshake(&mut self, stream: TcpStream, request: ClientRequestBuilder) -> Result<WebSocket<TcpStream>, CloseReason> {
        let deadline = self.options.handshake_timeout.map(|timeout| Instant::now() + timeout);
        let mut result = tungstenite::client::client_with_config(request, stream, Some(self.options.websocket_config()));
        loop {
            match result {
                Ok((socket, response)) => {
                    trace_on_connected(&response);
                    return Ok(socket);
                }
                Err(HandshakeError::Failure(e)) => {
                    tracing::error!("Handshake failed: {}", e);
                    return Err(CloseReason::Error(format!("Handshake failed: {}", e)));
                }
                Err(HandshakeError::Interrupted(mid)) => {
                    self.drain_control();
                    if self.close_requested_at.is_some() {
                        tracing::trace!("Close requested during handshake");
                        return Err(CloseReason::Local);
                    }
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        tracing::error!("Handshake timed out");
                        return Err(CloseReason::Error("Handshake timed out".to_string()));
                    }
                    result = mid.handshake();
                }
            }
        }
    }

    fn event_loop(&mut self, socket: &mut WebSocket<TcpStream>) -> CloseReason {
        self.notify(|client, handler| handler.on_connected(client));

        while let Some(data) = self.pending.pop_front() {
            send_binary_message(socket, data);
        }

        let mut peer_reason = None;
        loop {
            // 1. Outbound frames and close requests
            self.drain_control_into(socket);

            // 2. One read, bounded by the poll interval
            match socket.read() {
                Ok(Message::Binary(bytes)) => {
                    trace_on_binary_message(&bytes);
                    self.notify(|client, handler| handler.on_received(client, &bytes));
                }
                Ok(Message::Close(close_frame)) => {
                    trace_on_close_frame(&close_frame);
                    if self.close_requested_at.is_none() {
                        peer_reason = Some(close_frame.map(|cf| cf.to_string()));
                    }
                }
                Ok(Message::Text(message)) => {
                    if tracing::enabled!(tracing::Level::TRACE) {
                        tracing::trace!("Ignoring text message: {}", message);
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    tracing::trace!("Ignoring control frame");
                }
                Err(error) => match classify_read_error(error) {
                    ReadOutcome::Idle => {
                        if self.close_timed_out() {
                            tracing::warn!("Close handshake timed out");
                            return CloseReason::Local;
                        }
                    }
                    // A close frame the peer sent first wins over a later `stop`.
                    ReadOutcome::Closed => {
                        return match (peer_reason, self.close_requested_at) {
                            (Some(reason), _) => CloseReason::Remote(reason),
                            (None, Some(_)) => CloseReason::Local,
                            (None, None) => CloseReason::Remote(None),
                        };
                    }
                    ReadOutcome::Failed(error) => {
                        return match (peer_reason, self.close_requested_at) {
                            (Some(reason), _) => CloseReason::Remote(reason),
                            (None, Some(_)) => CloseReason::Local,
                            (None, None) => CloseReason::Error(error),
                        };
                    }
                },
            }
        }
    }

    /// Collects control messages while the handshake is still in flight.
    fn drain_control(&mut self) {
        loop {
            match self.control_rx.try_recv() {
                Ok(Control::Send(data)) => self.pending.push_back(data),
                Ok(Control::Close) => self.request_close(),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.request_close();
                    break;
                }
            }
        }
    }

    fn drain_control_into(&mut self, socket: &mut WebSocket<TcpStream>) {
        loop {
            match self.control_rx.try_recv() {
                Ok(Control::Send(data)) => {
                    if self.close_requested_at.is_some() {
                        tracing::warn!("Connection closing, dropping frame of {} bytes", data.len());
                    } else {
                        send_binary_message(socket, data);
                    }
                }
                Ok(Control::Close) => self.begin_close(socket, "stop"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Every client handle is gone.
                    self.begin_close(socket, "client dropped");
                    break;
                }
            }
        }
    }

    fn request_close(&mut self) {
        if self.close_requested_at.is_none() {
            self.close_requested_at = Some(Instant::now());
        }
    }

    fn begin_close(&mut self, socket: &mut WebSocket<TcpStream>, context: &str) {
        if self.close_requested_at.is_none() {
            self.request_close();
            close_websocket_with_logging(socket, context);
        }
    }

    fn close_timed_out(&self) -> bool {
        match (self.close_requested_at, self.options.close_timeout) {
            (Some(requested_at), Some(timeout)) => requested_at.elapsed() >= timeout,
            _ => false,
        }
    }

    fn notify<F>(&self, f: F)
    where
        F: FnOnce(&WsClient, &dyn WsClientHandler),
    {
        if let Some(inner) = self.client.upgrade() {
            let client = WsClient::from_inner(inner);
            if let Some(handler) = client.handler() {
                f(&client, handler.as_ref());
            }
        }
    }

    fn finish(&self, reason: CloseReason) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Connection finished: {}", reason);
        }
        if let Some(inner) = self.client.upgrade() {
            // Back to idle first so `on_closed` may start a new connection.
            inner.release_connection(self.id);
            let client = WsClient::from_inner(inner);
            if let Some(handler) = client.handler() {
                handler.on_closed(&client, reason);
            }
        }
    }
}

/// Maps socket read errors onto the loop's next step.
fn classify_read_error(error: Error) -> ReadOutcome {
    match error {
        Error::Io(io_err) if io_err.kind() == io::ErrorKind::WouldBlock => {
            // No data within the poll interval
            ReadOutcome::Idle
        }
        Error::Io(io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
            // No data within the poll interval (e.g. Windows)
            ReadOutcome::Idle
        }
        Error::ConnectionClosed | Error::AlreadyClosed => {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!("Connection closed normally");
            }
            ReadOutcome::Closed
        }
        e => {
            let error = format!("Failed to read from socket: {}", e);
            tracing::error!("{}", error);
            ReadOutcome::Failed(error)
        }
    }
}

#[inline]
fn send_binary_message(socket: &mut WebSocket<TcpStream>, data: Vec<u8>) {
    let len = data.len();
    match socket.send(Message::Binary(data.into())) {
        Ok(()) => {
            if tracing::enabled!(tracing::Level::TRACE) {
                tracing::trace!("Sent binary message of {} bytes", len);
            }
        }
        Err(e) => tracing::warn!("Error sending binary message of {} bytes: {}", len, e),
    }
}

/// Closes WebSocket connection with context logging
fn close_websocket_with_logging(socket: &mut WebSocket<TcpStream>, context: &str) {
    if socket.can_write() {
        socket
            .close(None)
            .map(|_| {
                tracing::trace!("Connection close successfully requested for context: {}", context);
            })
            .unwrap_or_else(|e| {
                tracing::error!("Error on connection close request for context {}: {}", context, e);
            });
    }
}

fn trace_on_connected(response: &Response) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Connected to the server");
        tracing::trace!("Response HTTP code: {}", response.status());
        tracing::trace!("Response contains the following headers:");
        for (header, _value) in response.headers() {
            tracing::trace!("* {header}");
        }
    }
}

#[inline]
fn trace_on_binary_message(bytes: &Bytes) {
    if tracing::enabled!(tracing::Level::TRACE) {
        tracing::trace!("Received binary message: {:?}", bytes);
    }
}

fn trace_on_close_frame(close_frame: &Option<CloseFrame>) {
    if tracing::enabled!(tracing::Level::TRACE) {
        match close_frame {
            Some(reason) => tracing::trace!("Connection closed with reason: {}", reason),
            None => tracing::trace!("Connection closed without reason"),
        }
    }
}
