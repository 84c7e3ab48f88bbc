//! TCP byte stream

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream as TokioTcpStream;
use wavesocket_core::error::{Error, Result, TimeoutError};
use wavesocket_core::stream::{ByteStream, CancelToken};

/// Dial `host:port` with a bound and a cancellation token, returning the
/// raw tokio stream so proxy tunneling and TLS can run on it before it is
/// wrapped into a [`TcpStream`].
pub async fn connect_raw(
    host: &str,
    port: u16,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<TokioTcpStream> {
    cancel.check()?;

    let cancelled = async {
        // The token has no waker; a poll interval keeps the wait honest
        // without spinning.
        while !cancel.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };

    let connect = TokioTcpStream::connect((host, port));
    let stream = tokio::select! {
        result = tokio::time::timeout(timeout, connect) => match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => return Err(TimeoutError::Connect { timeout }.into()),
        },
        _ = cancelled => return Err(Error::Cancelled),
    };

    stream.set_nodelay(true)?;
    tracing::debug!(host, port, "tcp connection established");
    Ok(stream)
}

/// TCP implementation of the core byte-stream contract
#[derive(Debug)]
pub struct TcpStream {
    inner: TokioTcpStream,
    open: bool,
}

impl TcpStream {
    /// Wrap an established tokio stream (client dial or server accept)
    pub fn from_tokio(inner: TokioTcpStream) -> Self {
        Self { inner, open: true }
    }

    /// Dial and wrap in one step
    pub async fn connect(
        host: &str,
        port: u16,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Self> {
        Ok(Self::from_tokio(
            connect_raw(host, port, timeout, cancel).await?,
        ))
    }
}

#[async_trait]
impl ByteStream for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.inner.read(buf).await?;
        if n == 0 {
            self.open = false;
        }
        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.inner.write(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        Ok(self.inner.write_all(buf).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.inner.flush().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.inner.shutdown().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.peer_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_and_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let cancel = CancelToken::new();
        let mut stream = TcpStream::connect(
            &addr.ip().to_string(),
            addr.port(),
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();
        assert!(stream.is_open());

        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        let mut read = 0;
        while read < 5 {
            read += stream.read(&mut buf[read..]).await.unwrap();
        }
        assert_eq!(&buf, b"hello");

        stream.close().await.unwrap();
        assert!(!stream.is_open());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_an_io_error() {
        let cancel = CancelToken::new();
        // Bind then drop to find a port that refuses connections
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = TcpStream::connect("127.0.0.1", port, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn connect_is_cancellable() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = TcpStream::connect("127.0.0.1", 9, Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
