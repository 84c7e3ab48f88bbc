//! Byte-stream abstraction
//!
//! Transports (plain TCP, TLS) implement [`ByteStream`]; everything above
//! the codec talks to this trait. Helpers for the line- and length-framed
//! reads the handshake and proxy layers need live here too, together with
//! the [`CancelToken`] checked at every suspension point.

use crate::error::{Error, Result};
use crate::protocol::constants::MAX_HEADER_SIZE;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation flag shared between an endpoint and its in-flight I/O.
///
/// Cancellation turns suspended reads and connect attempts into clean
/// [`Error::Cancelled`] returns; it never aborts the process.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every operation holding this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Reset the token so the endpoint can be started again
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Map the current state onto a result
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Byte-oriented duplex stream the transport state machine runs on
#[async_trait]
pub trait ByteStream: Send {
    /// Read up to `buf.len()` bytes; `Ok(0)` means the peer closed
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `buf.len()` bytes
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Write the whole buffer or fail
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush buffered writes down to the socket
    async fn flush(&mut self) -> Result<()>;

    /// Shut the stream down
    async fn close(&mut self) -> Result<()>;

    /// The stream has not been closed locally or by the peer
    fn is_open(&self) -> bool;

    /// Address of the remote end
    fn peer_addr(&self) -> Result<SocketAddr>;
}

/// Read bytes up to and including `\r\n`, capped at 8 KiB.
///
/// Used by the handshake and proxy layers, which read one header line at
/// a time before the frame codec takes over the stream.
pub async fn read_line(stream: &mut dyn ByteStream, cancel: &CancelToken) -> Result<String> {
    let mut line: Vec<u8> = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        cancel.check()?;
        match stream.read(&mut byte).await? {
            0 => return Err(Error::ConnectionClosed),
            _ => line.push(byte[0]),
        }
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if line.len() > MAX_HEADER_SIZE {
            return Err(crate::error::HandshakeError::HeadersTooLarge.into());
        }
    }
}

/// Read exactly `n` bytes or fail
pub async fn read_exact(
    stream: &mut dyn ByteStream,
    n: usize,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut offset = 0;
    while offset < n {
        cancel.check()?;
        match stream.read(&mut buf[offset..]).await? {
            0 => return Err(Error::ConnectionClosed),
            read => offset += read,
        }
    }
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory stream used by handshake and transport unit tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Script-driven stream: reads pop from `incoming`, writes append to
    /// `outgoing`.
    #[derive(Debug, Default)]
    pub struct MockStream {
        pub incoming: VecDeque<u8>,
        pub outgoing: Arc<Mutex<Vec<u8>>>,
        pub open: bool,
    }

    impl MockStream {
        pub fn new(incoming: impl AsRef<[u8]>) -> Self {
            Self {
                incoming: incoming.as_ref().iter().copied().collect(),
                outgoing: Arc::new(Mutex::new(Vec::new())),
                open: true,
            }
        }

        pub fn written(&self) -> Vec<u8> {
            self.outgoing.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ByteStream for MockStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            let mut n = 0;
            while n < buf.len() {
                match self.incoming.pop_front() {
                    Some(byte) => {
                        buf[n] = byte;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            self.outgoing.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            self.outgoing.lock().unwrap().extend_from_slice(buf);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn peer_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:9".parse().unwrap())
        }
    }
}
