//! Connection handlers
//!
//! The application implements [`Handler`] and receives every event of
//! every connection, together with a [`ClientHandle`] it can answer or
//! close through. Default method bodies are empty so handlers implement
//! only what they care about.

use crate::server::ClientHandle;
use async_trait::async_trait;
use bytes::Bytes;
use wavesocket_core::error::Error;

/// Application callbacks for server-side connections
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// A connection completed its handshake
    async fn on_open(&self, client: &ClientHandle) {
        let _ = client;
    }

    /// A complete data message arrived
    async fn on_message(&self, client: &ClientHandle, data: Bytes, binary: bool) {
        let _ = (client, data, binary);
    }

    /// A ping arrived (already answered when pong replies are enabled)
    async fn on_ping(&self, client: &ClientHandle, payload: Bytes) {
        let _ = (client, payload);
    }

    /// A pong arrived
    async fn on_pong(&self, client: &ClientHandle, payload: Bytes) {
        let _ = (client, payload);
    }

    /// The connection closed
    async fn on_close(&self, client: &ClientHandle, code: u16, reason: String, remote: bool) {
        let _ = (client, code, reason, remote);
    }

    /// The connection failed; `on_close` follows
    async fn on_error(&self, client: &ClientHandle, error: &Error) {
        let _ = (client, error);
    }
}

/// Echoes every data message back to its sender
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_message(&self, client: &ClientHandle, data: Bytes, binary: bool) {
        if binary {
            client.send_binary(data);
        } else {
            // Text messages arrive validated, the bytes are UTF-8
            client.send(&data, false);
        }
    }
}
