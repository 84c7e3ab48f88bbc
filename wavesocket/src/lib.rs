//! # WaveSocket
//!
//! An RFC 6455 WebSocket endpoint library for client and server roles
//! over plain TCP or TLS, with per-message DEFLATE (RFC 7692), HTTP
//! CONNECT and SOCKS5 proxy tunneling, and a supervisor providing
//! automatic reconnection with capped exponential backoff.
//!
//! ## Client
//!
//! ```rust,no_run
//! use wavesocket::prelude::*;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ws = WebSocket::with_options(ClientOptions::new("ws://127.0.0.1:9001/live"));
//!     ws.on_message(|event| match event {
//!         Event::Open(info) => println!("open: {}", info.uri),
//!         Event::Message { data, .. } => println!("got {} bytes", data.len()),
//!         Event::Error(err) => eprintln!("error: {} (retry #{})", err.reason, err.retries),
//!         _ => {}
//!     });
//!     ws.start();
//!     ws.send_text("hello");
//!     ws.stop().await;
//! }
//! ```
//!
//! ## Server
//!
//! ```rust,no_run
//! use wavesocket::server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = WebSocketServer::bind(ServerConfig::new("127.0.0.1", 9001), EchoHandler).await?;
//!     server.serve().await
//! }
//! ```

#![warn(missing_docs, rust_2018_idioms)]

pub use wavesocket_core::*;

#[cfg(feature = "client")]
pub use wavesocket_client as client;

#[cfg(feature = "server")]
pub use wavesocket_server as server;

#[cfg(feature = "client")]
pub use wavesocket_client::{ClientOptions, Event, ProxyConfig, ProxyType, WebSocket, WsUrl};

#[cfg(feature = "server")]
pub use wavesocket_server::{EchoHandler, Handler, ServerConfig, WebSocketServer};

/// Common imports for both roles
pub mod prelude {
    pub use wavesocket_core::prelude::*;

    #[cfg(feature = "client")]
    pub use wavesocket_client::prelude::*;

    #[cfg(feature = "server")]
    pub use wavesocket_server::prelude::*;
}
