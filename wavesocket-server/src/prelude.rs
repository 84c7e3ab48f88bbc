//! Common imports for server applications

pub use crate::config::ServerConfig;
pub use crate::handler::{EchoHandler, Handler};
pub use crate::logging::init_logging;
pub use crate::rate_limit::{RateLimitConfig, RateLimiter};
pub use crate::server::{ClientHandle, ClientRegistry, ShutdownHandle, WebSocketServer};
pub use wavesocket_core::prelude::*;
