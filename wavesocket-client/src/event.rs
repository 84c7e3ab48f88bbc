//! Application-facing events
//!
//! The single message sink installed with
//! [`WebSocket::set_on_message_callback`](crate::WebSocket::set_on_message_callback)
//! receives one [`Event`] per occurrence: the connection opening, complete
//! messages and fragments, control frames, the close, and every error with
//! its reconnection pacing.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Details of a successful connection
#[derive(Debug, Clone, Default)]
pub struct OpenInfo {
    /// Negotiated request uri
    pub uri: String,
    /// Response (client role) or request (server role) headers
    pub headers: HashMap<String, String>,
    /// Selected sub-protocol, empty when none was negotiated
    pub protocol: String,
}

/// Details of a connection close
#[derive(Debug, Clone, Default)]
pub struct CloseInfo {
    /// Close code (1006 when the connection dropped without one)
    pub code: u16,
    /// Close reason
    pub reason: String,
    /// The peer initiated the close handshake
    pub remote: bool,
}

/// Details of an error, including reconnection pacing
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    /// Human-readable failure description
    pub reason: String,
    /// HTTP status when the failure happened during the handshake, else 0
    pub http_status: u16,
    /// Consecutive failed connection attempts so far
    pub retries: u32,
    /// Milliseconds until the next reconnection attempt
    pub wait_time_ms: u64,
    /// The failure was a payload decompression error
    pub decompression_error: bool,
}

/// One occurrence reported to the application sink
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection opened (handshake succeeded)
    Open(OpenInfo),
    /// A complete data message arrived
    Message {
        /// Payload, UTF-8 when `binary` is false
        data: Bytes,
        /// Binary or text
        binary: bool,
        /// Bytes the message occupied on the wire, pre-inflate
        wire_size: usize,
    },
    /// A non-final fragment arrived (the complete message follows later)
    Fragment {
        /// Wire size of the fragment frame
        wire_size: usize,
    },
    /// A ping arrived (answered automatically unless pong replies are off)
    Ping(Bytes),
    /// A pong arrived
    Pong(Bytes),
    /// The connection closed
    Close(CloseInfo),
    /// An error occurred; the supervisor may be about to reconnect
    Error(ErrorInfo),
}

/// The application sink type
pub type OnMessageCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Backpressure callback: `(buffered_bytes, above_threshold)`, invoked
/// exactly once per threshold crossing
pub type BackpressureCallback = Arc<dyn Fn(usize, bool) + Send + Sync>;
