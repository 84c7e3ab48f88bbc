//! Accept loop, client registry and per-connection tasks

use crate::config::ServerConfig;
use crate::handler::Handler;
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream as TokioTcpStream};
use tokio::sync::{Mutex, Notify};
use wavesocket_core::error::{Error, Result, TimeoutError};
use wavesocket_core::handshake::{server_handshake, HandshakeResult, ServerHandshakeOptions};
use wavesocket_core::message::{MessageKind, SendInfo};
use wavesocket_core::stream::{ByteStream, CancelToken};
use wavesocket_core::transport::{
    Priority, ReadyState, Role, SendKind, Transport, TransportConfig, TransportEvent,
    TransportHandle,
};
use wavesocket_transport_tcp::TcpStream;

#[cfg(feature = "tls")]
use tokio_rustls::TlsAcceptor;
#[cfg(feature = "tls")]
use wavesocket_transport_tls::{build_server_config, TlsStream};

/// Cloneable reference to one connected client
#[derive(Clone)]
pub struct ClientHandle {
    id: u64,
    peer_addr: SocketAddr,
    protocol: String,
    transport: TransportHandle,
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl ClientHandle {
    /// Registry id of this client
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Negotiated sub-protocol, empty when none
    pub fn sub_protocol(&self) -> &str {
        &self.protocol
    }

    /// Connection state
    pub fn ready_state(&self) -> ReadyState {
        self.transport.ready_state()
    }

    /// Queued outbound wire bytes for this client
    pub fn buffered_amount(&self) -> usize {
        self.transport.buffered_amount()
    }

    /// Send text or binary at normal priority
    pub fn send(&self, data: &[u8], binary: bool) -> SendInfo {
        let kind = if binary { SendKind::Binary } else { SendKind::Text };
        self.transport.send(kind, data, Priority::Normal, None)
    }

    /// Send a text message
    pub fn send_text(&self, text: &str) -> SendInfo {
        self.transport
            .send(SendKind::Text, text.as_bytes(), Priority::Normal, None)
    }

    /// Send a binary message
    pub fn send_binary(&self, data: impl AsRef<[u8]>) -> SendInfo {
        self.transport
            .send(SendKind::Binary, data.as_ref(), Priority::Normal, None)
    }

    /// Send a ping; fails when the payload exceeds 125 bytes
    pub fn ping(&self, payload: &[u8]) -> SendInfo {
        self.transport.send(SendKind::Ping, payload, Priority::Normal, None)
    }

    /// Request the close handshake
    pub fn close(&self, code: u16, reason: &str) {
        self.transport.close(code, reason);
    }
}

/// Shared registry of live clients; the handler task holds one reference
/// per connection and releases it on exit.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, ClientHandle>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn insert(&self, client: ClientHandle) {
        self.clients.lock().await.insert(client.id, client);
    }

    async fn remove(&self, id: u64) {
        self.clients.lock().await.remove(&id);
    }

    /// Look a client up by id
    pub async fn get(&self, id: u64) -> Option<ClientHandle> {
        self.clients.lock().await.get(&id).cloned()
    }

    /// Snapshot of every live client
    pub async fn all(&self) -> Vec<ClientHandle> {
        self.clients.lock().await.values().cloned().collect()
    }

    /// Number of live clients
    pub async fn count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Send to every live client
    pub async fn broadcast(&self, data: &[u8], binary: bool) {
        for client in self.all().await {
            client.send(data, binary);
        }
    }

    /// Begin the close handshake on every live client
    pub async fn close_all(&self, code: u16, reason: &str) {
        for client in self.all().await {
            client.close(code, reason);
        }
    }
}

/// Handle used to stop a running server from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    /// Stop the accept loop and close every client with 1001
    pub fn shutdown(&self) {
        self.0.notify_one();
    }
}

/// A bound WebSocket server; `serve()` runs the accept loop
pub struct WebSocketServer {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    registry: Arc<ClientRegistry>,
    rate_limiter: Option<Arc<RateLimiter>>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    #[cfg(feature = "tls")]
    acceptor: Option<TlsAcceptor>,
}

impl std::fmt::Debug for WebSocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServer")
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WebSocketServer {
    /// Bind the listener and prepare to serve
    pub async fn bind(config: ServerConfig, handler: impl Handler) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "websocket server listening");

        #[cfg(feature = "tls")]
        let acceptor = match &config.tls {
            Some(tls) => {
                let server_config = build_server_config(&tls.cert_file, &tls.key_file)?;
                Some(TlsAcceptor::from(Arc::new(server_config)))
            }
            None => None,
        };

        let rate_limiter = config
            .rate_limit
            .clone()
            .map(|rl| Arc::new(RateLimiter::new(rl)));

        Ok(Self {
            config,
            handler: Arc::new(handler),
            registry: Arc::new(ClientRegistry::default()),
            rate_limiter,
            listener,
            local_addr,
            shutdown: Arc::new(Notify::new()),
            #[cfg(feature = "tls")]
            acceptor,
        })
    }

    /// The bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The shared client registry
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// A handle that stops `serve()` from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown))
    }

    /// Accept connections until the shutdown handle fires
    pub async fn serve(self) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("server shutting down");
                    self.registry.close_all(1001, "server shutting down").await;
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (tcp, peer_addr) = accepted?;
                    self.admit(tcp, peer_addr).await;
                }
            }
        }
    }

    async fn admit(&self, tcp: TokioTcpStream, peer_addr: SocketAddr) {
        if self.registry.count().await >= self.config.max_connections {
            tracing::warn!(%peer_addr, "connection refused: server full");
            return;
        }
        if let Some(rate_limiter) = &self.rate_limiter {
            if !rate_limiter.admit(peer_addr.ip()).await {
                return;
            }
        }

        let _ = tcp.set_nodelay(true);
        let context = ConnectionContext {
            config: self.config.clone(),
            handler: Arc::clone(&self.handler),
            registry: Arc::clone(&self.registry),
            rate_limiter: self.rate_limiter.clone(),
            #[cfg(feature = "tls")]
            acceptor: self.acceptor.clone(),
        };
        tokio::spawn(async move {
            let released_ip = peer_addr.ip();
            let rate_limiter = context.rate_limiter.clone();
            if let Err(error) = handle_connection(context, tcp, peer_addr).await {
                tracing::debug!(%peer_addr, %error, "connection ended with error");
            }
            if let Some(rate_limiter) = rate_limiter {
                rate_limiter.release(released_ip).await;
            }
        });
    }
}

struct ConnectionContext {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    registry: Arc<ClientRegistry>,
    rate_limiter: Option<Arc<RateLimiter>>,
    #[cfg(feature = "tls")]
    acceptor: Option<TlsAcceptor>,
}

async fn handle_connection(
    context: ConnectionContext,
    tcp: TokioTcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let config = &context.config;

    #[cfg(feature = "tls")]
    let mut stream: Box<dyn ByteStream> = match &context.acceptor {
        Some(acceptor) => Box::new(TlsStream::accept(tcp, acceptor).await?),
        None => Box::new(TcpStream::from_tokio(tcp)),
    };
    #[cfg(not(feature = "tls"))]
    let mut stream: Box<dyn ByteStream> = Box::new(TcpStream::from_tokio(tcp));

    // Opening handshake, bounded on both the read and the write side
    let cancel = CancelToken::new();
    let handshake_options = ServerHandshakeOptions {
        enable_deflate: config.enable_deflate,
        sub_protocols: &config.sub_protocols,
        server_header: &config.server_header,
    };
    let handshake_timeout = config.timeouts.handshake_timeout;
    let handshake: HandshakeResult = tokio::time::timeout(
        handshake_timeout,
        server_handshake(stream.as_mut(), &handshake_options, &cancel),
    )
    .await
    .map_err(|_| {
        Error::Timeout(TimeoutError::Handshake {
            timeout: handshake_timeout,
        })
    })??;

    let mut transport_config = TransportConfig::new(Role::Server);
    transport_config.deflate = handshake.deflate;
    transport_config.timeouts = config.timeouts;
    transport_config.enable_pong = config.enable_pong;
    transport_config.max_frame_size = config.max_frame_size;
    transport_config.max_message_size = config.max_message_size;

    let (mut transport, transport_handle) = Transport::new(stream, transport_config);
    let client = ClientHandle {
        id: context.registry.next_id(),
        peer_addr,
        protocol: handshake.protocol.clone(),
        transport: transport_handle,
    };
    context.registry.insert(client.clone()).await;
    tracing::debug!(%peer_addr, id = client.id, uri = %handshake.uri, "client connected");
    #[cfg(feature = "metrics")]
    metrics::counter!("wavesocket_server_connections_total").increment(1);

    context.handler.on_open(&client).await;
    if config.timeouts.ping_interval.is_some() {
        let _ = transport.send_heartbeat().await;
    }

    let mut events: Vec<TransportEvent> = Vec::new();
    let outcome = loop {
        if transport.ready_state() == ReadyState::Closed {
            break Ok(());
        }
        let result = transport.poll().await;
        let dispatched = transport
            .dispatch(result, &mut |event| events.push(event))
            .await;

        for event in events.drain(..) {
            deliver(&context, &client, event).await;
        }
        if let Err(error) = dispatched {
            context.handler.on_error(&client, &error).await;
            break Err(error);
        }
    };

    context.registry.remove(client.id).await;
    tracing::debug!(%peer_addr, id = client.id, "client disconnected");
    outcome
}

async fn deliver(context: &ConnectionContext, client: &ClientHandle, event: TransportEvent) {
    match event {
        TransportEvent::Message {
            kind,
            data,
            wire_size,
        } => {
            #[cfg(feature = "metrics")]
            metrics::counter!("wavesocket_server_bytes_received_total")
                .increment(wire_size as u64);
            let _ = wire_size;
            match kind {
                MessageKind::Text => context.handler.on_message(client, data, false).await,
                MessageKind::Binary => context.handler.on_message(client, data, true).await,
                MessageKind::Ping => context.handler.on_ping(client, data).await,
                MessageKind::Pong => context.handler.on_pong(client, data).await,
                MessageKind::Fragment | MessageKind::Close => {}
            }
        }
        TransportEvent::Closed {
            code,
            reason,
            remote,
        } => {
            context.handler.on_close(client, code, reason, remote).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let server = WebSocketServer::bind(ServerConfig::default(), EchoHandler)
            .await
            .unwrap();
        let addr = server.local_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_serve() {
        let server = WebSocketServer::bind(ServerConfig::default(), EchoHandler)
            .await
            .unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());
        shutdown.shutdown();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("serve did not stop")
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn registry_counts_and_lookups() {
        let registry = ClientRegistry::default();
        assert_eq!(registry.count().await, 0);
        assert!(registry.get(1).await.is_none());
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }
}
