//! Logging initialization
//!
//! Thin helper over `tracing-subscriber` honoring `RUST_LOG`; embedders
//! with their own subscriber simply skip it.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a formatted `tracing` subscriber filtered by `RUST_LOG`
/// (default `info`). Safe to call once per process.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
