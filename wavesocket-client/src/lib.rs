//! # WaveSocket Client
//!
//! The client side of WaveSocket: a [`WebSocket`] endpoint supervised by a
//! background task that connects, reconnects with capped exponential
//! backoff, schedules heartbeats, and dispatches every incoming message to
//! a single application sink. Supports `ws://` and `wss://` targets,
//! tunneling through HTTP CONNECT and SOCKS5 proxies, and an optional
//! process-wide pool of idle sockets.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod backoff;
pub mod config;
pub mod event;
pub mod pool;
pub mod proxy;
pub mod stats;
pub mod supervisor;
pub mod url;

pub mod prelude;

pub use config::ClientOptions;
pub use event::{CloseInfo, ErrorInfo, Event, OpenInfo};
pub use proxy::{ProxyConfig, ProxyType};
pub use stats::StatsSnapshot;
pub use supervisor::WebSocket;
pub use url::WsUrl;
