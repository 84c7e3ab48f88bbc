//! Common imports for client applications

pub use crate::backoff::calculate_retry_wait_millis;
pub use crate::config::ClientOptions;
pub use crate::event::{CloseInfo, ErrorInfo, Event, OpenInfo};
pub use crate::pool;
pub use crate::proxy::{ProxyConfig, ProxyType};
pub use crate::stats::{reset_traffic_tracker, set_traffic_tracker, StatsSnapshot};
pub use crate::supervisor::WebSocket;
pub use crate::url::WsUrl;
pub use wavesocket_core::prelude::*;
