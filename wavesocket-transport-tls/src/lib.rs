//! TLS transport for WaveSocket
//!
//! Implements the core [`ByteStream`](wavesocket_core::ByteStream)
//! contract over `tokio-rustls`, for `wss://` clients and TLS-terminating
//! servers. The client connector wraps an already-established TCP stream
//! so proxy tunnels (HTTP CONNECT, SOCKS5) run before the TLS handshake.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod tls;

pub use tls::{build_client_config, build_server_config, TlsOptions, TlsStream};

/// Common imports
pub mod prelude {
    pub use crate::{build_client_config, TlsOptions, TlsStream};
}
