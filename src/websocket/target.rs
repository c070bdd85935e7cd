use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use tungstenite::http::Uri;
use crate::error::{WsClientError, WsResult};

// ============================================================================
// Connection target
// ============================================================================

pub(crate) const DEFAULT_HOST: &str = "127.0.0.1";

/// WebSocket URI scheme accepted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ws,
    Wss,
}

impl Scheme {
    /// Case-insensitive match against `ws` / `wss`.
    pub fn parse(scheme: &str) -> Option<Scheme> {
        if scheme.eq_ignore_ascii_case("ws") {
            Some(Scheme::Ws)
        } else if scheme.eq_ignore_ascii_case("wss") {
            Some(Scheme::Wss)
        } else {
            None
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Ws => 80,
            Scheme::Wss => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated connection target derived from a WebSocket URI.
///
/// Parsing never touches the network. The defaults are:
/// - missing scheme: `ws`
/// - missing host: `127.0.0.1`, also for `ws:///path` and `ws:/path`
/// - missing port: 80 for `ws`, 443 for `wss`
///
/// A port that is present but empty or outside `0..=65535` is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    scheme: Scheme,
    host: String,
    port: u16,
    path_and_query: String,
}

impl ConnectTarget {
    pub fn parse(uri: &str) -> WsResult<ConnectTarget> {
        let parsed = Uri::from_str(&fill_missing_host(uri)).map_err(|e| {
            tracing::error!("Invalid URI <{}>: {}", uri, e);
            WsClientError::InvalidUri(format!("{}: {}", uri, e))
        })?;

        let scheme_str = parsed.scheme_str().unwrap_or("ws");
        let scheme = Scheme::parse(scheme_str);

        let port_text = parsed.authority().and_then(|authority| explicit_port(authority.as_str()));
        if let (Some(text), None) = (port_text, parsed.port_u16()) {
            tracing::error!("Invalid port '{}' in URI <{}>", text, uri);
            return Err(WsClientError::InvalidUri(format!("{}: invalid port '{}'", uri, text)));
        }

        // Port is resolved before the scheme is checked, so a foreign scheme
        // without a port reports as an unknown port.
        let port = match (parsed.port_u16(), scheme) {
            (Some(port), _) => port,
            (None, Some(scheme)) => scheme.default_port(),
            (None, None) => {
                tracing::error!("Unknown port for URI <{}>", uri);
                return Err(WsClientError::UnknownPort(uri.to_string()));
            }
        };
        let scheme = match scheme {
            Some(scheme) => scheme,
            None => {
                tracing::error!("Only ws(s) is supported, got scheme '{}'", scheme_str);
                return Err(WsClientError::UnsupportedScheme(scheme_str.to_string()));
            }
        };

        let host = match parsed.host() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']').to_string(),
            _ => DEFAULT_HOST.to_string(),
        };
        let path_and_query = parsed
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| pq.starts_with('/'))
            .unwrap_or("/")
            .to_string();

        let target = ConnectTarget { scheme, host, port, path_and_query };
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!("scheme:{} host:{} port:{}", target.scheme, target.host, target.port);
        }
        Ok(target)
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host without IPv6 brackets, suitable for socket address resolution.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path_and_query(&self) -> &str {
        &self.path_and_query
    }

    /// Full URI sent in the upgrade request, with every default filled in.
    pub fn request_uri(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.path_and_query)
    }

    fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Inserts the default host into `scheme:///path`, `scheme:/path` and
/// `scheme://:port` forms, which the URI parser rejects without a host.
fn fill_missing_host(uri: &str) -> Cow<'_, str> {
    let Some((scheme, rest)) = uri.split_once(':') else {
        return Cow::Borrowed(uri);
    };
    let valid_scheme = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme || !rest.starts_with('/') {
        return Cow::Borrowed(uri);
    }

    let after_slashes = rest.strip_prefix("//").unwrap_or(rest);
    let missing_host = !rest.starts_with("//")
        || after_slashes.is_empty()
        || after_slashes.starts_with(['/', ':', '?']);
    if !missing_host {
        return Cow::Borrowed(uri);
    }
    let remainder = if rest.starts_with("//") { after_slashes } else { rest };
    Cow::Owned(format!("{}://{}{}", scheme, DEFAULT_HOST, remainder))
}

/// Text after the host's port separator, if the authority has one.
fn explicit_port(authority: &str) -> Option<&str> {
    let host_and_port = authority.rsplit_once('@').map_or(authority, |(_, rest)| rest);
    let after_host = if host_and_port.starts_with('[') {
        &host_and_port[host_and_port.find(']')? + 1..]
    } else {
        host_and_port
    };
    after_host.split_once(':').map(|(_, port)| port)
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.request_uri())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_port_is_kept() {
        let target = ConnectTarget::parse("ws://example.com:9001/chat").unwrap();
        assert_eq!(target.scheme(), Scheme::Ws);
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 9001);
        assert_eq!(target.path_and_query(), "/chat");
    }

    #[test]
    fn default_ports_follow_scheme() {
        assert_eq!(ConnectTarget::parse("ws://example.com/").unwrap().port(), 80);
        assert_eq!(ConnectTarget::parse("wss://example.com/").unwrap().port(), 443);
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let target = ConnectTarget::parse("WSS://example.com").unwrap();
        assert_eq!(target.scheme(), Scheme::Wss);
        assert_eq!(target.port(), 443);
        assert_eq!(target.request_uri(), "wss://example.com:443/");
    }

    #[test]
    fn foreign_scheme_with_port_is_unsupported() {
        let err = ConnectTarget::parse("http://example.com:8080/").unwrap_err();
        assert!(matches!(err, WsClientError::UnsupportedScheme(ref s) if s == "http"));
    }

    #[test]
    fn foreign_scheme_without_port_is_unknown_port() {
        let err = ConnectTarget::parse("ftp://example.com/").unwrap_err();
        assert!(matches!(err, WsClientError::UnknownPort(_)));
        assert!(err.is_invalid_target());
    }

    #[test]
    fn unparseable_uri_is_rejected() {
        let err = ConnectTarget::parse("ws://exa mple.com/").unwrap_err();
        assert!(matches!(err, WsClientError::InvalidUri(_)));
    }

    #[test]
    fn missing_scheme_and_host_use_defaults() {
        let target = ConnectTarget::parse("/socket?room=1").unwrap();
        assert_eq!(target.scheme(), Scheme::Ws);
        assert_eq!(target.host(), DEFAULT_HOST);
        assert_eq!(target.port(), 80);
        assert_eq!(target.request_uri(), "ws://127.0.0.1:80/socket?room=1");
    }

    #[test]
    fn authority_only_uri_defaults_to_ws() {
        let target = ConnectTarget::parse("localhost:8080").unwrap();
        assert_eq!(target.scheme(), Scheme::Ws);
        assert_eq!(target.host(), "localhost");
        assert_eq!(target.port(), 8080);
        assert_eq!(target.path_and_query(), "/");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        for uri in ["ws://example.com:99999/", "ws://example.com:65536/", "ws://[::1]:70000/"] {
            let err = ConnectTarget::parse(uri).unwrap_err();
            assert!(matches!(err, WsClientError::InvalidUri(_)), "{}", uri);
            assert!(err.is_invalid_target());
        }
    }

    #[test]
    fn empty_port_is_rejected() {
        for uri in ["ws://example.com:/", "wss://example.com:", "ws://:/"] {
            let err = ConnectTarget::parse(uri).unwrap_err();
            assert!(matches!(err, WsClientError::InvalidUri(_)), "{}", uri);
        }
    }

    #[test]
    fn highest_port_is_accepted() {
        assert_eq!(ConnectTarget::parse("ws://example.com:65535/").unwrap().port(), 65535);
    }

    #[test]
    fn scheme_qualified_uri_without_host_uses_loopback() {
        let target = ConnectTarget::parse("ws:///echo").unwrap();
        assert_eq!(target.host(), DEFAULT_HOST);
        assert_eq!(target.port(), 80);
        assert_eq!(target.path_and_query(), "/echo");

        let target = ConnectTarget::parse("ws:/echo?x=1").unwrap();
        assert_eq!(target.request_uri(), "ws://127.0.0.1:80/echo?x=1");

        let target = ConnectTarget::parse("wss://:9000/chat").unwrap();
        assert_eq!(target.host(), DEFAULT_HOST);
        assert_eq!(target.port(), 9000);
        assert_eq!(target.scheme(), Scheme::Wss);
    }

    #[test]
    fn userinfo_colon_is_not_a_port() {
        let target = ConnectTarget::parse("ws://user:secret@example.com/").unwrap();
        assert_eq!(target.host(), "example.com");
        assert_eq!(target.port(), 80);
    }

    #[test]
    fn ipv6_host_is_unbracketed_for_resolution() {
        let target = ConnectTarget::parse("ws://[::1]:9000/").unwrap();
        assert_eq!(target.host(), "::1");
        assert_eq!(target.request_uri(), "ws://[::1]:9000/");
    }
}
