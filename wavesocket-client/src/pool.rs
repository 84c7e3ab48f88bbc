//! Process-wide connection pool
//!
//! A lazily-initialized singleton keyed by `host:port[:tls]`, holding a
//! bounded FIFO of idle sockets with their last-used instants. `acquire`
//! hands back a still-open socket or nothing (the caller then dials);
//! `release` returns a socket or drops it when the bucket is full.
//! Cleanup runs on every acquire and discards entries that sat idle past
//! the timeout or whose socket has closed.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

const DEFAULT_MAX_PER_HOST: usize = 4;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct PooledSocket {
    stream: TcpStream,
    last_used: Instant,
}

struct PoolState {
    buckets: HashMap<String, VecDeque<PooledSocket>>,
    max_per_host: usize,
    idle_timeout: Duration,
}

/// Bounded pool of idle sockets, shared by every client in the process
pub struct ConnectionPool {
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool").finish_non_exhaustive()
    }
}

/// The process-wide pool instance
pub fn global() -> &'static ConnectionPool {
    static POOL: OnceLock<ConnectionPool> = OnceLock::new();
    POOL.get_or_init(|| ConnectionPool {
        state: Mutex::new(PoolState {
            buckets: HashMap::new(),
            max_per_host: DEFAULT_MAX_PER_HOST,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }),
    })
}

fn make_key(host: &str, port: u16, tls: bool) -> String {
    if tls {
        format!("{}:{}:tls", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// A socket no longer usable: closed by the peer, or with stale bytes
/// pending that a fresh protocol exchange could misinterpret.
fn is_still_idle_and_open(stream: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match stream.try_read(&mut probe) {
        // EOF
        Ok(0) => false,
        // Unexpected data while idle
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
        Err(_) => false,
    }
}

impl ConnectionPool {
    /// Take a still-open idle socket for the target, oldest first
    pub fn acquire(&self, host: &str, port: u16, tls: bool) -> Option<TcpStream> {
        let mut state = self.state.lock().ok()?;
        Self::cleanup(&mut state);

        let bucket = state.buckets.get_mut(&make_key(host, port, tls))?;
        while let Some(pooled) = bucket.pop_front() {
            if is_still_idle_and_open(&pooled.stream) {
                tracing::trace!(host, port, "reusing pooled connection");
                return Some(pooled.stream);
            }
        }
        None
    }

    /// Return an idle socket; dropped when the bucket is full
    pub fn release(&self, host: &str, port: u16, tls: bool, stream: TcpStream) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let max = state.max_per_host;
        let bucket = state.buckets.entry(make_key(host, port, tls)).or_default();
        if bucket.len() >= max {
            return;
        }
        bucket.push_back(PooledSocket {
            stream,
            last_used: Instant::now(),
        });
    }

    /// Cap on idle sockets kept per `host:port[:tls]` key
    pub fn set_max_connections_per_host(&self, max: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.max_per_host = max;
        }
    }

    /// How long an idle socket survives in the pool
    pub fn set_idle_timeout(&self, timeout: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.idle_timeout = timeout;
        }
    }

    /// Drop every pooled socket
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.buckets.clear();
        }
    }

    /// Number of idle sockets currently pooled
    pub fn idle_count(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.buckets.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    fn cleanup(state: &mut PoolState) {
        let idle_timeout = state.idle_timeout;
        let now = Instant::now();
        state.buckets.retain(|_, bucket| {
            bucket.retain(|pooled| {
                now.duration_since(pooled.last_used) <= idle_timeout
                    && is_still_idle_and_open(&pooled.stream)
            });
            !bucket.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn test_pool() -> ConnectionPool {
        ConnectionPool {
            state: Mutex::new(PoolState {
                buckets: HashMap::new(),
                max_per_host: 2,
                idle_timeout: Duration::from_secs(60),
            }),
        }
    }

    #[tokio::test]
    async fn release_then_acquire_returns_the_socket() {
        let pool = test_pool();
        let (client, _server) = connected_pair().await;
        pool.release("example.com", 80, false, client);
        assert_eq!(pool.idle_count(), 1);

        assert!(pool.acquire("example.com", 80, false).is_some());
        assert_eq!(pool.idle_count(), 0);
        // Bucket now empty
        assert!(pool.acquire("example.com", 80, false).is_none());
    }

    #[tokio::test]
    async fn tls_and_plain_keys_do_not_mix() {
        let pool = test_pool();
        let (client, _server) = connected_pair().await;
        pool.release("example.com", 443, true, client);
        assert!(pool.acquire("example.com", 443, false).is_none());
        assert!(pool.acquire("example.com", 443, true).is_some());
    }

    #[tokio::test]
    async fn full_bucket_drops_the_release() {
        let pool = test_pool();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (client, server) = connected_pair().await;
            keep.push(server);
            pool.release("example.com", 80, false, client);
        }
        // max_per_host is 2
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn closed_sockets_are_discarded() {
        let pool = test_pool();
        let (client, server) = connected_pair().await;
        drop(server);
        pool.release("example.com", 80, false, client);
        // Give the close a moment to propagate through the loopback
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pool.acquire("example.com", 80, false).is_none());
    }

    #[tokio::test]
    async fn idle_timeout_expires_entries() {
        let pool = test_pool();
        pool.set_idle_timeout(Duration::from_millis(0));
        let (client, _server) = connected_pair().await;
        pool.release("example.com", 80, false, client);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(pool.acquire("example.com", 80, false).is_none());
        assert_eq!(pool.idle_count(), 0);
    }
}
