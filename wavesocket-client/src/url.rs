//! WebSocket URL parsing
//!
//! `ws://host[:port]/path` (default port 80) and `wss://host[:port]/path`
//! (default 443). The path keeps its query string; an absent path becomes
//! `/`.

use wavesocket_core::error::{ConfigError, Error, Result};
use wavesocket_core::protocol::constants::{DEFAULT_WSS_PORT, DEFAULT_WS_PORT};

/// Parsed WebSocket endpoint address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// `wss://`
    pub secure: bool,
    /// Target host (name or literal address)
    pub host: String,
    /// Target port, scheme default when absent from the URL
    pub port: u16,
    /// Request path including the query string, at least `/`
    pub path: String,
}

impl WsUrl {
    /// Parse a `ws://` or `wss://` URL
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = || Error::Config(ConfigError::InvalidUrl(url.to_string()));

        let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(invalid());
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };
        if authority.is_empty() {
            return Err(invalid());
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                (host.to_string(), port.parse::<u16>().map_err(|_| invalid())?)
            }
            _ => {
                let default = if secure { DEFAULT_WSS_PORT } else { DEFAULT_WS_PORT };
                (authority.to_string(), default)
            }
        };

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }
}

impl std::fmt::Display for WsUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}
