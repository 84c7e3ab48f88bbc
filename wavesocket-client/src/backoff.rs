//! Reconnection backoff
//!
//! Capped exponential backoff for the supervisor's reconnect loop:
//! `wait = min(min_wait * 2^retries, max_wait)`, retries starting at 0.

/// Milliseconds to wait before reconnect attempt number `retry_count`
pub fn calculate_retry_wait_millis(retry_count: u32, min_wait_ms: u64, max_wait_ms: u64) -> u64 {
    let multiplier = 1u64 << retry_count.min(63);
    min_wait_ms.saturating_mul(multiplier).min(max_wait_ms)
}
