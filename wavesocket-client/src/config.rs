//! Client configuration
//!
//! Everything the supervisor reads under its config lock: target URL,
//! handshake headers, sub-protocols, deflate and proxy settings, timeout
//! knobs, reconnection bounds and the backpressure threshold.

use crate::proxy::ProxyConfig;
use wavesocket_core::deflate::DeflateConfig;
use wavesocket_core::error::{ConfigError, Error, Result};
use wavesocket_core::protocol::constants;
use wavesocket_core::transport::Timeouts;

#[cfg(feature = "tls")]
use wavesocket_transport_tls::TlsOptions;

/// Default initial reconnect backoff in milliseconds
pub const DEFAULT_MIN_RECONNECT_WAIT_MS: u64 = 1;
/// Default reconnect backoff cap in milliseconds
pub const DEFAULT_MAX_RECONNECT_WAIT_MS: u64 = 10_000;

/// Configuration of one supervised client endpoint
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// `ws://` or `wss://` target
    pub url: String,
    /// Extra headers merged into the handshake (reserved names dropped)
    pub extra_headers: Vec<(String, String)>,
    /// Sub-protocols offered, in preference order
    pub sub_protocols: Vec<String>,
    /// Optional `Origin` header
    pub origin: Option<String>,
    /// `User-Agent` header value
    pub user_agent: String,
    /// Timeout knobs (ping, idle, send, close, handshake)
    pub timeouts: Timeouts,
    /// Offer permessage-deflate in the handshake
    pub enable_deflate: bool,
    /// Parameters offered with permessage-deflate
    pub deflate: DeflateConfig,
    /// Proxy to tunnel through before TLS/upgrade
    pub proxy: ProxyConfig,
    /// TLS options for `wss://` targets
    #[cfg(feature = "tls")]
    pub tls: TlsOptions,
    /// Answer received pings with pongs automatically
    pub enable_pong: bool,
    /// Payload of automatic heartbeat pings
    pub ping_message: String,
    /// Reconnect with backoff after failures and disconnects
    pub automatic_reconnection: bool,
    /// Initial backoff in milliseconds
    pub min_reconnect_wait_ms: u64,
    /// Backoff cap in milliseconds
    pub max_reconnect_wait_ms: u64,
    /// Buffered outbound bytes before the backpressure callback fires;
    /// 0 disables
    pub backpressure_threshold: usize,
    /// Reuse idle sockets from the process-wide pool (direct, non-proxy
    /// plain connections only)
    pub use_connection_pool: bool,
    /// Largest frame accepted from the peer
    pub max_frame_size: usize,
    /// Largest reassembled message accepted from the peer
    pub max_message_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            extra_headers: Vec::new(),
            sub_protocols: Vec::new(),
            origin: None,
            user_agent: format!("wavesocket/{}", env!("CARGO_PKG_VERSION")),
            timeouts: Timeouts::default(),
            enable_deflate: true,
            deflate: DeflateConfig::default(),
            proxy: ProxyConfig::default(),
            #[cfg(feature = "tls")]
            tls: TlsOptions::default(),
            enable_pong: true,
            ping_message: String::new(),
            automatic_reconnection: true,
            min_reconnect_wait_ms: DEFAULT_MIN_RECONNECT_WAIT_MS,
            max_reconnect_wait_ms: DEFAULT_MAX_RECONNECT_WAIT_MS,
            backpressure_threshold: 0,
            use_connection_pool: false,
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientOptions {
    /// Options pointed at `url`, everything else default
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Cross-field validation, run before every connect
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Config(ConfigError::MissingUrl));
        }
        if self.max_frame_size == 0 || self.max_message_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_frame_size and max_message_size must be greater than 0".to_string(),
            )));
        }
        if self.max_message_size < self.max_frame_size {
            return Err(Error::Config(ConfigError::Validation(
                "max_message_size must be at least max_frame_size".to_string(),
            )));
        }
        if self.min_reconnect_wait_ms > self.max_reconnect_wait_ms {
            return Err(Error::Config(ConfigError::Validation(
                "min_reconnect_wait_ms must not exceed max_reconnect_wait_ms".to_string(),
            )));
        }
        if self.ping_message.len() > constants::MAX_CONTROL_PAYLOAD {
            return Err(Error::Config(ConfigError::Validation(
                "ping_message must fit a control frame (125 bytes)".to_string(),
            )));
        }
        Ok(())
    }

    /// Set the target URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Add one extra handshake header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Offer one more sub-protocol
    pub fn sub_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.sub_protocols.push(protocol.into());
        self
    }

    /// Replace the timeout knobs
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enable or disable the permessage-deflate offer
    pub fn per_message_deflate(mut self, enabled: bool) -> Self {
        self.enable_deflate = enabled;
        self
    }

    /// Tunnel through this proxy
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn automatic_reconnection(mut self, enabled: bool) -> Self {
        self.automatic_reconnection = enabled;
        self
    }

    /// Reconnection backoff bounds in milliseconds
    pub fn reconnect_wait_bounds_ms(mut self, min: u64, max: u64) -> Self {
        self.min_reconnect_wait_ms = min;
        self.max_reconnect_wait_ms = max;
        self
    }

    /// Buffered-bytes threshold for the backpressure callback
    pub fn backpressure_threshold(mut self, bytes: usize) -> Self {
        self.backpressure_threshold = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::default();
        assert!(options.enable_deflate);
        assert!(options.automatic_reconnection);
        assert!(options.enable_pong);
        assert_eq!(options.min_reconnect_wait_ms, 1);
        assert_eq!(options.max_reconnect_wait_ms, 10_000);
        assert_eq!(options.backpressure_threshold, 0);
        assert_eq!(options.timeouts.send_timeout.as_secs(), 300);
        assert_eq!(options.timeouts.close_timeout.as_secs(), 5);
        assert_eq!(options.timeouts.handshake_timeout.as_secs(), 5);
        assert!(options.timeouts.ping_interval.is_none());
    }

    #[test]
    fn validation_requires_a_url() {
        assert!(ClientOptions::default().validate().is_err());
        assert!(ClientOptions::new("ws://example.com").validate().is_ok());
    }

    #[test]
    fn validation_checks_bounds() {
        let mut options = ClientOptions::new("ws://example.com");
        options.max_message_size = 10;
        options.max_frame_size = 100;
        assert!(options.validate().is_err());

        let mut options = ClientOptions::new("ws://example.com");
        options.min_reconnect_wait_ms = 100;
        options.max_reconnect_wait_ms = 10;
        assert!(options.validate().is_err());

        let mut options = ClientOptions::new("ws://example.com");
        options.ping_message = "x".repeat(200);
        assert!(options.validate().is_err());
    }

    #[test]
    fn builder_accumulates() {
        let options = ClientOptions::new("ws://example.com/feed")
            .header("X-Token", "abc")
            .sub_protocol("json")
            .sub_protocol("msgpack")
            .per_message_deflate(false)
            .reconnect_wait_bounds_ms(50, 5_000)
            .backpressure_threshold(1 << 20);
        assert_eq!(options.extra_headers.len(), 1);
        assert_eq!(options.sub_protocols, vec!["json", "msgpack"]);
        assert!(!options.enable_deflate);
        assert_eq!(options.min_reconnect_wait_ms, 50);
        assert_eq!(options.backpressure_threshold, 1 << 20);
    }
}
