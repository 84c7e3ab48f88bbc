//! Server configuration

use crate::rate_limit::RateLimitConfig;
use wavesocket_core::error::{ConfigError, Error, Result};
use wavesocket_core::protocol::constants;
use wavesocket_core::transport::Timeouts;

/// Configuration of one server instance
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port (0 picks a free port)
    pub port: u16,
    /// Cap on concurrent connections across all peers
    pub max_connections: usize,
    /// Timeout knobs applied to every accepted connection
    pub timeouts: Timeouts,
    /// Accept permessage-deflate offers from clients
    pub enable_deflate: bool,
    /// Answer received pings with pongs automatically
    pub enable_pong: bool,
    /// Sub-protocols this server speaks, in preference order
    pub sub_protocols: Vec<String>,
    /// Value of the `Server` response header
    pub server_header: String,
    /// Per-IP rate limiting; `None` disables
    pub rate_limit: Option<RateLimitConfig>,
    /// Largest frame accepted from a client
    pub max_frame_size: usize,
    /// Largest reassembled message accepted from a client
    pub max_message_size: usize,
    /// Serve TLS with this certificate chain and key (PEM paths)
    #[cfg(feature = "tls")]
    pub tls: Option<TlsServerOptions>,
}

/// Certificate material for a TLS-terminating server
#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub struct TlsServerOptions {
    /// Certificate chain, PEM
    pub cert_file: String,
    /// Private key, PKCS#8 or RSA PEM
    pub key_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 1024,
            timeouts: Timeouts::default(),
            enable_deflate: true,
            enable_pong: true,
            sub_protocols: Vec::new(),
            server_header: format!("wavesocket/{}", env!("CARGO_PKG_VERSION")),
            rate_limit: Some(RateLimitConfig::default()),
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Config bound to `host:port`, everything else default
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Cross-field validation, run at bind time
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "host",
                value: self.host.clone(),
            }));
        }
        if self.max_connections == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_connections must be greater than 0".to_string(),
            )));
        }
        if self.max_message_size < self.max_frame_size {
            return Err(Error::Config(ConfigError::Validation(
                "max_message_size must be at least max_frame_size".to_string(),
            )));
        }
        Ok(())
    }

    /// Cap on concurrent connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Replace the timeout knobs
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Accept permessage-deflate offers
    pub fn per_message_deflate(mut self, enabled: bool) -> Self {
        self.enable_deflate = enabled;
        self
    }

    /// Speak one more sub-protocol
    pub fn sub_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.sub_protocols.push(protocol.into());
        self
    }

    /// Per-IP rate limiting; `None` disables
    pub fn rate_limit(mut self, config: Option<RateLimitConfig>) -> Self {
        self.rate_limit = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.enable_deflate);
        assert!(config.rate_limit.is_some());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.host.clear();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.max_message_size = 1;
        assert!(config.validate().is_err());
    }
}
