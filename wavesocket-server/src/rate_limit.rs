//! Per-IP rate limiting
//!
//! Guards the accept loop: a sliding-window cap on connection attempts
//! per IP plus a cap on concurrent connections per IP. Counters release
//! when the connection task exits.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Rate limiter knobs
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Connection attempts allowed per window per IP
    pub max_attempts_per_window: usize,
    /// Width of the attempt window
    pub window: Duration,
    /// Concurrent connections allowed per IP
    pub max_connections_per_ip: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_window: 100,
            window: Duration::from_secs(60),
            max_connections_per_ip: 32,
        }
    }
}

#[derive(Debug, Clone)]
struct AttemptCounter {
    count: usize,
    window_start: Instant,
}

/// Tracks connection attempts and live connections per peer IP
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    attempts: Mutex<HashMap<IpAddr, AttemptCounter>>,
    connections: Mutex<HashMap<IpAddr, usize>>,
}

impl RateLimiter {
    /// A limiter with the given knobs
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            attempts: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `ip` may open a connection now. On success the concurrent
    /// counter is already incremented; call [`release`](Self::release)
    /// when the connection ends.
    pub async fn admit(&self, ip: IpAddr) -> bool {
        {
            let mut attempts = self.attempts.lock().await;
            let now = Instant::now();
            let counter = attempts.entry(ip).or_insert(AttemptCounter {
                count: 0,
                window_start: now,
            });
            if now.duration_since(counter.window_start) >= self.config.window {
                counter.count = 0;
                counter.window_start = now;
            }
            if counter.count >= self.config.max_attempts_per_window {
                tracing::warn!(%ip, "connection attempt rate limit exceeded");
                return false;
            }
            counter.count += 1;
        }

        let mut connections = self.connections.lock().await;
        let count = connections.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            tracing::warn!(%ip, "concurrent connection limit exceeded");
            return false;
        }
        *count += 1;
        true
    }

    /// Release one concurrent connection slot for `ip`
    pub async fn release(&self, ip: IpAddr) {
        let mut connections = self.connections.lock().await;
        if let Some(count) = connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(&ip);
            }
        }
    }

    /// Drop attempt windows that expired and empty connection entries
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let window = self.config.window;
        self.attempts
            .lock()
            .await
            .retain(|_, counter| now.duration_since(counter.window_start) < window * 2);
        self.connections.lock().await.retain(|_, count| *count > 0);
    }

    /// Number of IPs with live connections
    pub async fn active_ips(&self) -> usize {
        self.connections.lock().await.len()
    }
}
