//! Error types for the WebSocket client.
//!
//! [`WsClientError`] covers everything that can go wrong before a connection
//! lifetime begins. Failures after that point (handshake rejected, peer reset)
//! are reported through [`CloseReason`](crate::CloseReason) on the close
//! notification instead.
//!
//! # Examples
//!
//! ```no_run
//! use rex_ws_client::{WsClient, WsClientError};
//!
//! let client = WsClient::new();
//! match client.start("http://127.0.0.1:9000/") {
//!     Ok(_) => println!("connecting"),
//!     Err(e) if e.is_invalid_target() => eprintln!("bad target: {}", e),
//!     Err(WsClientError::Io(err)) => eprintln!("network error: {}", err),
//!     Err(e) => eprintln!("start failed: {}", e),
//! }
//! ```

use std::fmt;
use tungstenite::Error as TungsteniteError;

/// Error type for all client operations.
///
/// # Error Categories
///
/// - **Target errors** (no I/O attempted): [`InvalidUri`](Self::InvalidUri),
///   [`UnsupportedScheme`](Self::UnsupportedScheme), [`UnknownPort`](Self::UnknownPort)
/// - **Configuration errors**: [`InvalidConfiguration`](Self::InvalidConfiguration)
/// - **Runtime errors**: [`ConnectTimeout`](Self::ConnectTimeout), [`Busy`](Self::Busy),
///   [`Io`](Self::Io), [`Tungstenite`](Self::Tungstenite)
#[derive(Debug)]
pub enum WsClientError {
    /// The target URI could not be parsed.
    InvalidUri(String),

    /// The URI scheme is neither `ws` nor `wss`.
    ///
    /// ```no_run
    /// use rex_ws_client::{WsClient, WsClientError};
    ///
    /// let client = WsClient::new();
    /// let result = client.start("ftp://127.0.0.1:21/");
    /// assert!(matches!(result, Err(WsClientError::UnsupportedScheme(_))));
    /// ```
    UnsupportedScheme(String),

    /// The URI carries no port and its scheme has no default one.
    UnknownPort(String),

    /// An option was given an invalid value, such as a zero-duration timeout.
    InvalidConfiguration(String),

    /// The TCP connect did not complete within the configured connect timeout.
    ConnectTimeout,

    /// A lifecycle change was requested from inside a callback while another
    /// thread was already starting or stopping the client.
    Busy,

    /// An I/O operation failed (name resolution, TCP connect, socket options).
    Io(std::io::Error),

    /// An error from the underlying tungstenite WebSocket library.
    Tungstenite(TungsteniteError),
}

impl WsClientError {
    /// Returns `true` if the error was raised while validating the target,
    /// i.e. before any network activity took place.
    pub fn is_invalid_target(&self) -> bool {
        matches!(
            self,
            WsClientError::InvalidUri(_) | WsClientError::UnsupportedScheme(_) | WsClientError::UnknownPort(_)
        )
    }
}

impl fmt::Display for WsClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsClientError::InvalidUri(uri) => write!(f, "Invalid URI: {}", uri),
            WsClientError::UnsupportedScheme(scheme) => write!(f, "Unsupported scheme '{}', only ws(s) is supported", scheme),
            WsClientError::UnknownPort(uri) => write!(f, "Unknown port for URI: {}", uri),
            WsClientError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            WsClientError::ConnectTimeout => write!(f, "Connect timed out"),
            WsClientError::Busy => write!(f, "Client lifecycle change already in progress"),
            WsClientError::Io(err) => write!(f, "IO error: {}", err),
            WsClientError::Tungstenite(err) => write!(f, "WebSocket error: {}", err),
        }
    }
}

impl std::error::Error for WsClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WsClientError::Io(err) => Some(err),
            WsClientError::Tungstenite(err) => Some(err),
            _ => None,
        }
    }
}

// Convert from tungstenite errors to WsClientError
impl From<TungsteniteError> for WsClientError {
    fn from(err: TungsteniteError) -> Self {
        match err {
            TungsteniteError::Io(io_err) => WsClientError::Io(io_err),
            TungsteniteError::Url(url_err) => WsClientError::InvalidUri(url_err.to_string()),
            _ => WsClientError::Tungstenite(err),
        }
    }
}

impl From<std::io::Error> for WsClientError {
    fn from(err: std::io::Error) -> Self {
        WsClientError::Io(err)
    }
}

/// Convenience type alias for `Result<T, WsClientError>`.
pub type WsResult<T> = Result<T, WsClientError>;
