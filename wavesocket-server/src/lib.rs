//! # WaveSocket Server
//!
//! The server side of WaveSocket: a TCP (optionally TLS) accept loop that
//! rate-limits by peer IP, performs the opening handshake, spawns one task
//! per connection, and keeps every live client in a shared registry so
//! the application can address or broadcast to them.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod config;
pub mod handler;
pub mod logging;
pub mod rate_limit;
pub mod server;

pub mod prelude;

pub use config::ServerConfig;
pub use handler::{EchoHandler, Handler};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use server::{ClientHandle, ClientRegistry, WebSocketServer};
