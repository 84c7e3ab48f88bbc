//! Connection statistics and the process-wide traffic tracker

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, RwLock};
use std::time::{Duration, Instant};

/// Atomic counters for one supervised endpoint; reset on every connect
#[derive(Debug)]
pub struct Stats {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    pings_sent: AtomicU64,
    pongs_sent: AtomicU64,
    pings_received: AtomicU64,
    pongs_received: AtomicU64,
    connection_start: Mutex<Instant>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            pings_sent: AtomicU64::new(0),
            pongs_sent: AtomicU64::new(0),
            pings_received: AtomicU64::new(0),
            pongs_received: AtomicU64::new(0),
            connection_start: Mutex::new(Instant::now()),
        }
    }
}

macro_rules! counter_methods {
    ($($field:ident => $record:ident),* $(,)?) => {
        $(
            pub(crate) fn $record(&self, amount: u64) {
                self.$field.fetch_add(amount, Ordering::Relaxed);
            }
        )*
    };
}

impl Stats {
    counter_methods! {
        messages_sent => record_message_sent,
        messages_received => record_message_received,
        bytes_sent => record_bytes_sent,
        bytes_received => record_bytes_received,
        pings_sent => record_ping_sent,
        pongs_sent => record_pong_sent,
        pings_received => record_ping_received,
        pongs_received => record_pong_received,
    }

    /// Zero every counter and restamp the connection start instant
    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.pings_sent.store(0, Ordering::Relaxed);
        self.pongs_sent.store(0, Ordering::Relaxed);
        self.pings_received.store(0, Ordering::Relaxed);
        self.pongs_received.store(0, Ordering::Relaxed);
        if let Ok(mut start) = self.connection_start.lock() {
            *start = Instant::now();
        }
    }

    /// Time since the current connection opened
    pub fn connection_duration(&self) -> Duration {
        self.connection_start
            .lock()
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    /// Consistent-enough copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_sent: self.pongs_sent.load(Ordering::Relaxed),
            pings_received: self.pings_received.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
            connection_duration: self.connection_duration(),
        }
    }
}

/// Point-in-time copy of the endpoint counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub pings_sent: u64,
    pub pongs_sent: u64,
    pub pings_received: u64,
    pub pongs_received: u64,
    pub connection_duration: Duration,
}

/// Process-wide traffic hook: `(wire_size, incoming)` for every message
/// that crosses any WaveSocket endpoint in the process
pub type TrafficTrackerCallback = std::sync::Arc<dyn Fn(usize, bool) + Send + Sync>;

fn traffic_tracker() -> &'static RwLock<Option<TrafficTrackerCallback>> {
    static TRACKER: OnceLock<RwLock<Option<TrafficTrackerCallback>>> = OnceLock::new();
    TRACKER.get_or_init(|| RwLock::new(None))
}

/// Install the process-wide traffic tracker
pub fn set_traffic_tracker(callback: TrafficTrackerCallback) {
    if let Ok(mut tracker) = traffic_tracker().write() {
        *tracker = Some(callback);
    }
}

/// Remove the process-wide traffic tracker
pub fn reset_traffic_tracker() {
    if let Ok(mut tracker) = traffic_tracker().write() {
        *tracker = None;
    }
}

pub(crate) fn invoke_traffic_tracker(size: usize, incoming: bool) {
    if let Ok(tracker) = traffic_tracker().read() {
        if let Some(callback) = tracker.as_ref() {
            callback(size, incoming);
        }
    }
}
