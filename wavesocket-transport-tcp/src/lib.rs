//! Plain TCP transport for WaveSocket
//!
//! Implements the core [`ByteStream`](wavesocket_core::ByteStream)
//! contract over `tokio::net::TcpStream`, plus a connect helper with
//! timeout and cancellation for the client side.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

mod tcp;

pub use tcp::{connect_raw, TcpStream};

/// Common imports
pub mod prelude {
    pub use crate::{connect_raw, TcpStream};
}
