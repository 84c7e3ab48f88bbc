//! The supervised WebSocket endpoint
//!
//! A [`WebSocket`] owns one background task (the supervisor) that
//! connects, runs the transport poll/dispatch loop, and reconnects with
//! capped exponential backoff when the connection drops. The application
//! configures the endpoint, installs a single message sink, and calls
//! `start()`; `stop()` runs the close handshake, interrupts any backoff
//! sleep, and joins the task.

use crate::backoff::calculate_retry_wait_millis;
use crate::config::ClientOptions;
use crate::event::{BackpressureCallback, CloseInfo, ErrorInfo, Event, OnMessageCallback, OpenInfo};
use crate::pool;
use crate::proxy;
use crate::stats::{invoke_traffic_tracker, Stats, StatsSnapshot};
use crate::url::WsUrl;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use wavesocket_core::error::{Error, Result, TimeoutError};
use wavesocket_core::handshake::{client_handshake, ClientHandshakeOptions};
use wavesocket_core::message::{MessageKind, SendInfo};
use wavesocket_core::stream::{ByteStream, CancelToken};
use wavesocket_core::transport::{
    Priority, ProgressCallback, ReadyState, Role, SendKind, Transport, TransportConfig,
    TransportEvent, TransportHandle,
};
use wavesocket_transport_tcp::{connect_raw, TcpStream};

#[cfg(feature = "tls")]
use wavesocket_transport_tls::{build_client_config, TlsOptions, TlsStream};

struct Inner {
    options: Mutex<ClientOptions>,
    on_message: RwLock<Option<OnMessageCallback>>,
    on_backpressure: RwLock<Option<BackpressureCallback>>,
    backpressure_active: AtomicBool,
    stop: AtomicBool,
    connecting: AtomicBool,
    cancel: CancelToken,
    sleep_notify: Notify,
    transport: Mutex<Option<TransportHandle>>,
    stats: Stats,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A WebSocket endpoint driven by a background supervisor task
pub struct WebSocket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("ready_state", &self.ready_state())
            .field("buffered_amount", &self.buffered_amount())
            .finish()
    }
}

impl Default for WebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocket {
    /// An unconfigured endpoint; set a URL and a sink before starting
    pub fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    /// An endpoint with the given configuration
    pub fn with_options(options: ClientOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options: Mutex::new(options),
                on_message: RwLock::new(None),
                on_backpressure: RwLock::new(None),
                backpressure_active: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                cancel: CancelToken::new(),
                sleep_notify: Notify::new(),
                transport: Mutex::new(None),
                stats: Stats::default(),
                task: Mutex::new(None),
            }),
        }
    }

    // -- configuration ----------------------------------------------------

    fn with_options_mut<R>(&self, apply: impl FnOnce(&mut ClientOptions) -> R) -> R {
        let mut options = self
            .inner
            .options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        apply(&mut options)
    }

    /// Set the `ws://` or `wss://` target
    pub fn set_url(&self, url: impl Into<String>) {
        self.with_options_mut(|options| options.url = url.into());
    }

    /// The configured target URL
    pub fn url(&self) -> String {
        self.with_options_mut(|options| options.url.clone())
    }

    /// Replace the extra handshake headers
    pub fn set_extra_headers(&self, headers: Vec<(String, String)>) {
        self.with_options_mut(|options| options.extra_headers = headers);
    }

    /// Offer one more sub-protocol
    pub fn add_sub_protocol(&self, protocol: impl Into<String>) {
        self.with_options_mut(|options| options.sub_protocols.push(protocol.into()));
    }

    /// Withdraw a previously offered sub-protocol
    pub fn remove_sub_protocol(&self, protocol: &str) {
        self.with_options_mut(|options| options.sub_protocols.retain(|p| p != protocol));
    }

    /// Drop every offered sub-protocol
    pub fn clear_sub_protocols(&self) {
        self.with_options_mut(|options| options.sub_protocols.clear());
    }

    /// The currently offered sub-protocols
    pub fn sub_protocols(&self) -> Vec<String> {
        self.with_options_mut(|options| options.sub_protocols.clone())
    }

    /// Replace every timeout knob at once
    pub fn set_timeouts(&self, timeouts: wavesocket_core::transport::Timeouts) {
        self.with_options_mut(|options| options.timeouts = timeouts);
    }

    /// Automatic ping cadence in seconds; `<= 0` disables
    pub fn set_ping_interval(&self, secs: i64) {
        self.with_options_mut(|options| {
            options.timeouts = options.timeouts.ping_interval_secs(secs);
        });
    }

    /// Payload carried by automatic heartbeat pings
    pub fn set_ping_message(&self, message: impl Into<String>) {
        self.with_options_mut(|options| options.ping_message = message.into());
    }

    /// Answer received pings with pongs automatically (on by default)
    pub fn set_pong(&self, enabled: bool) {
        self.with_options_mut(|options| options.enable_pong = enabled);
    }

    /// Offer permessage-deflate in the handshake (on by default, subject
    /// to the peer accepting)
    pub fn set_per_message_deflate(&self, enabled: bool) {
        self.with_options_mut(|options| options.enable_deflate = enabled);
    }

    /// Tunnel through this proxy before TLS and upgrade
    pub fn set_proxy_config(&self, proxy: proxy::ProxyConfig) {
        self.with_options_mut(|options| options.proxy = proxy);
    }

    /// TLS options for `wss://` targets
    #[cfg(feature = "tls")]
    pub fn set_tls_options(&self, tls: TlsOptions) {
        self.with_options_mut(|options| options.tls = tls);
    }

    /// Reconnect automatically after failures and disconnects
    pub fn set_automatic_reconnection(&self, enabled: bool) {
        self.with_options_mut(|options| options.automatic_reconnection = enabled);
    }

    /// Whether automatic reconnection is enabled
    pub fn is_automatic_reconnection_enabled(&self) -> bool {
        self.with_options_mut(|options| options.automatic_reconnection)
    }

    /// Initial reconnect backoff in milliseconds
    pub fn set_min_wait_between_reconnection_retries(&self, millis: u64) {
        self.with_options_mut(|options| options.min_reconnect_wait_ms = millis);
    }

    /// Reconnect backoff cap in milliseconds
    pub fn set_max_wait_between_reconnection_retries(&self, millis: u64) {
        self.with_options_mut(|options| options.max_reconnect_wait_ms = millis);
    }

    /// Bound on the opening handshake in seconds
    pub fn set_handshake_timeout(&self, secs: u64) {
        self.with_options_mut(|options| {
            options.timeouts = options.timeouts.handshake_timeout_secs(secs);
        });
    }

    /// Buffered-bytes threshold for the backpressure callback; 0 disables
    pub fn set_backpressure_threshold(&self, bytes: usize) {
        self.with_options_mut(|options| options.backpressure_threshold = bytes);
    }

    /// Install the single application sink receiving every [`Event`]
    pub fn set_on_message_callback(&self, callback: OnMessageCallback) {
        if let Ok(mut sink) = self.inner.on_message.write() {
            *sink = Some(callback);
        }
    }

    /// Convenience wrapper over [`Self::set_on_message_callback`]
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.set_on_message_callback(Arc::new(callback));
    }

    /// Install the backpressure crossing callback
    pub fn set_backpressure_callback(&self, callback: BackpressureCallback) {
        if let Ok(mut sink) = self.inner.on_backpressure.write() {
            *sink = Some(callback);
        }
    }

    // -- lifecycle --------------------------------------------------------

    /// Launch the supervisor task. A no-op while one is already running
    /// and the endpoint is not closed.
    pub fn start(&self) {
        let mut task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = task.as_ref() {
            // At most one supervisor task; relaunch only after the
            // previous one has fully ended.
            if !existing.is_finished() {
                return;
            }
        }
        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.cancel.reset();
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_loop(inner)));
    }

    /// Run the supervisor on the caller's task instead of a spawned one
    pub async fn run(&self) {
        run_loop(Arc::clone(&self.inner)).await;
    }

    /// Close with 1000 and join the supervisor task
    pub async fn stop(&self) {
        self.stop_with(1000, "Normal closure").await;
    }

    /// Close with the given code/reason, interrupt any backoff sleep,
    /// and join the supervisor task.
    pub async fn stop_with(&self, code: u16, reason: &str) {
        self.close(code, reason);
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.sleep_notify.notify_one();

        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }

        self.inner.stop.store(false, Ordering::SeqCst);
        self.inner.cancel.reset();
    }

    /// Request the close handshake on the current connection
    pub fn close(&self, code: u16, reason: &str) {
        let handle = self.current_handle();
        if let Some(handle) = handle {
            handle.close(code, reason);
        }
    }

    // -- sending ----------------------------------------------------------

    /// Send text or binary at normal priority
    pub fn send(&self, data: &[u8], binary: bool) -> SendInfo {
        let kind = if binary { SendKind::Binary } else { SendKind::Text };
        self.send_message(kind, data, Priority::Normal, None)
    }

    /// Send at the given priority; `High` bypasses the FIFO
    pub fn send_with_priority(&self, data: &[u8], binary: bool, priority: Priority) -> SendInfo {
        let kind = if binary { SendKind::Binary } else { SendKind::Text };
        self.send_message(kind, data, priority, None)
    }

    /// Send a text message (`&str`, so UTF-8 holds by construction)
    pub fn send_text(&self, text: &str) -> SendInfo {
        self.send_message(SendKind::Text, text.as_bytes(), Priority::Normal, None)
    }

    /// Send a binary message
    pub fn send_binary(&self, data: impl AsRef<[u8]>) -> SendInfo {
        self.send_message(SendKind::Binary, data.as_ref(), Priority::Normal, None)
    }

    /// Send a binary message with a progress callback invoked when the
    /// queued bytes reach the socket
    pub fn send_binary_with_progress(
        &self,
        data: impl AsRef<[u8]>,
        on_progress: ProgressCallback,
    ) -> SendInfo {
        self.send_message(
            SendKind::Binary,
            data.as_ref(),
            Priority::Normal,
            Some(on_progress),
        )
    }

    /// Send a ping; fails when the payload exceeds 125 bytes
    pub fn ping(&self, payload: &str) -> SendInfo {
        self.send_message(SendKind::Ping, payload.as_bytes(), Priority::Normal, None)
    }

    fn send_message(
        &self,
        kind: SendKind,
        payload: &[u8],
        priority: Priority,
        on_progress: Option<ProgressCallback>,
    ) -> SendInfo {
        let Some(handle) = self.current_handle() else {
            return SendInfo::failed();
        };
        let info = handle.send(kind, payload, priority, on_progress);
        if info.success {
            match kind {
                SendKind::Text | SendKind::Binary => {
                    self.inner.stats.record_message_sent(1);
                    self.inner.stats.record_bytes_sent(info.wire_size as u64);
                }
                SendKind::Ping => self.inner.stats.record_ping_sent(1),
                SendKind::Pong => self.inner.stats.record_pong_sent(1),
            }
            invoke_traffic_tracker(info.wire_size, false);
            #[cfg(feature = "metrics")]
            {
                metrics::counter!("wavesocket_client_messages_sent_total").increment(1);
                metrics::counter!("wavesocket_client_bytes_sent_total")
                    .increment(info.wire_size as u64);
            }
        }
        check_backpressure(&self.inner);
        info
    }

    // -- introspection ----------------------------------------------------

    fn current_handle(&self) -> Option<TransportHandle> {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current connection state
    pub fn ready_state(&self) -> ReadyState {
        if self.inner.connecting.load(Ordering::SeqCst) {
            return ReadyState::Connecting;
        }
        self.current_handle()
            .map(|handle| handle.ready_state())
            .unwrap_or(ReadyState::Closed)
    }

    /// Sum of queued outbound wire bytes
    pub fn buffered_amount(&self) -> usize {
        self.current_handle()
            .map(|handle| handle.buffered_amount())
            .unwrap_or(0)
    }

    /// Counters for the current connection
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Zero the counters
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        self.inner.cancel.cancel();
        self.inner.sleep_notify.notify_one();
        if let Ok(mut task) = self.inner.task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

// -- supervisor loop ------------------------------------------------------

async fn run_loop(inner: Arc<Inner>) {
    let mut first = true;
    'supervisor: loop {
        // 1. Make sure we are connected (retrying with backoff), unless
        //    stop was requested or reconnection is off.
        let Some(mut transport) = check_connection(&inner, first).await else {
            break;
        };
        first = false;

        loop {
            let state = transport.ready_state();
            if state == ReadyState::Closed {
                break;
            }
            // A requested stop only waits for an in-flight close handshake.
            if inner.stop.load(Ordering::SeqCst) && state != ReadyState::Closing {
                break 'supervisor;
            }

            // 2. Wait for readiness or a wake-up; 3. dispatch.
            let result = transport.poll().await;
            let dispatched = {
                let inner = &inner;
                let mut sink = move |event: TransportEvent| handle_transport_event(inner, event);
                transport.dispatch(result, &mut sink).await
            };
            if let Err(error) = dispatched {
                emit_error(&inner, &error, 0, 0);
            }
            check_backpressure(&inner);
        }

        if inner.stop.load(Ordering::SeqCst) {
            break;
        }
        let automatic = {
            let options = inner
                .options
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            options.automatic_reconnection
        };
        if !automatic {
            break;
        }
        tracing::debug!("connection ended, supervisor will reconnect");
    }
    inner.connecting.store(false, Ordering::SeqCst);
}

/// Connect, or reconnect forever with capped exponential backoff. The
/// sleep between attempts is interrupted by `stop()`.
async fn check_connection(inner: &Arc<Inner>, first_attempt: bool) -> Option<Transport> {
    let mut first = first_attempt;
    let mut retries: u32 = 0;
    let mut wait: Option<Duration> = None;

    loop {
        if inner.stop.load(Ordering::SeqCst) {
            return None;
        }
        let (automatic, min_wait, max_wait) = {
            let options = inner
                .options
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (
                options.automatic_reconnection,
                options.min_reconnect_wait_ms,
                options.max_reconnect_wait_ms,
            )
        };
        if !first && !automatic {
            return None;
        }
        first = false;

        if let Some(duration) = wait.take() {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = inner.sleep_notify.notified() => {}
            }
        }
        if inner.stop.load(Ordering::SeqCst) {
            return None;
        }

        inner.connecting.store(true, Ordering::SeqCst);
        let attempt = connect_once(inner).await;
        inner.connecting.store(false, Ordering::SeqCst);

        match attempt {
            Ok((mut transport, open_info)) => {
                inner.stats.reset();
                #[cfg(feature = "metrics")]
                metrics::counter!("wavesocket_client_connections_opened_total").increment(1);
                emit(inner, Event::Open(open_info));

                let ping_configured = {
                    let options = inner
                        .options
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    options.timeouts.ping_interval.is_some()
                };
                if ping_configured && transport.send_heartbeat().await.is_ok() {
                    inner.stats.record_ping_sent(1);
                }
                return Some(transport);
            }
            Err(error) => {
                let mut wait_ms = 0;
                let mut reported_retries = 0;
                if automatic {
                    wait_ms = calculate_retry_wait_millis(retries, min_wait, max_wait);
                    retries += 1;
                    reported_retries = retries;
                    wait = Some(Duration::from_millis(wait_ms));
                }
                tracing::warn!(
                    error = %error,
                    retries = reported_retries,
                    wait_ms,
                    "websocket connection attempt failed"
                );
                emit_error(inner, &error, reported_retries, wait_ms);
            }
        }
    }
}

/// One connection attempt: dial (through the pool and/or proxy), wrap in
/// TLS for `wss://`, run the opening handshake, build the transport.
async fn connect_once(inner: &Arc<Inner>) -> Result<(Transport, OpenInfo)> {
    let options = {
        let options = inner
            .options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        options.clone()
    };
    options.validate()?;
    let url = WsUrl::parse(&options.url)?;
    let cancel = inner.cancel.clone();
    let handshake_timeout = options.timeouts.handshake_timeout;

    // Dial the proxy when one is configured, the target otherwise.
    let (dial_host, dial_port) = if options.proxy.is_enabled() {
        (options.proxy.host.clone(), options.proxy.port)
    } else {
        (url.host.clone(), url.port)
    };

    let pooled = (options.use_connection_pool && !options.proxy.is_enabled() && !url.secure)
        .then(|| pool::global().acquire(&dial_host, dial_port, false))
        .flatten();
    let mut tcp = match pooled {
        Some(stream) => stream,
        None => connect_raw(&dial_host, dial_port, handshake_timeout, &cancel).await?,
    };

    if options.proxy.is_enabled() {
        proxy::tunnel(&mut tcp, &options.proxy, &url.host, url.port, &cancel).await?;
    }

    let mut stream: Box<dyn ByteStream> = if url.secure {
        #[cfg(feature = "tls")]
        {
            let tls_config = build_client_config(&options.tls)?;
            let domain = options
                .tls
                .server_name
                .clone()
                .unwrap_or_else(|| url.host.clone());
            Box::new(TlsStream::connect(tcp, &domain, Arc::new(tls_config)).await?)
        }
        #[cfg(not(feature = "tls"))]
        {
            let _ = tcp;
            return Err(Error::Other(
                "wss:// requires the tls feature of wavesocket-client".to_string(),
            ));
        }
    } else {
        Box::new(TcpStream::from_tokio(tcp))
    };

    let handshake_options = ClientHandshakeOptions {
        url: &options.url,
        host: &url.host,
        port: url.port,
        path: &url.path,
        extra_headers: &options.extra_headers,
        sub_protocols: &options.sub_protocols,
        origin: options.origin.as_deref(),
        user_agent: &options.user_agent,
        deflate: options.enable_deflate.then_some(options.deflate),
    };

    let handshake = tokio::time::timeout(
        handshake_timeout,
        client_handshake(stream.as_mut(), &handshake_options, &cancel),
    )
    .await
    .map_err(|_| {
        Error::Timeout(TimeoutError::Handshake {
            timeout: handshake_timeout,
        })
    })??;

    let mut transport_config = TransportConfig::new(Role::Client);
    transport_config.deflate = handshake.deflate;
    transport_config.timeouts = options.timeouts;
    transport_config.enable_pong = options.enable_pong;
    transport_config.ping_message = options.ping_message.clone();
    transport_config.max_frame_size = options.max_frame_size;
    transport_config.max_message_size = options.max_message_size;

    let (transport, handle) = Transport::new(stream, transport_config);
    {
        let mut slot = inner
            .transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(handle);
    }

    tracing::info!(url = %options.url, protocol = %handshake.protocol, "websocket open");
    Ok((
        transport,
        OpenInfo {
            uri: handshake.uri,
            headers: handshake.headers,
            protocol: handshake.protocol,
        },
    ))
}

fn handle_transport_event(inner: &Arc<Inner>, event: TransportEvent) {
    match event {
        TransportEvent::Message {
            kind,
            data,
            wire_size,
        } => {
            match kind {
                MessageKind::Text | MessageKind::Binary => {
                    inner.stats.record_message_received(1);
                    inner.stats.record_bytes_received(wire_size as u64);
                    #[cfg(feature = "metrics")]
                    {
                        metrics::counter!("wavesocket_client_messages_received_total")
                            .increment(1);
                        metrics::counter!("wavesocket_client_bytes_received_total")
                            .increment(wire_size as u64);
                    }
                    emit(
                        inner,
                        Event::Message {
                            data,
                            binary: kind == MessageKind::Binary,
                            wire_size,
                        },
                    );
                }
                MessageKind::Ping => {
                    inner.stats.record_ping_received(1);
                    let pong_enabled = {
                        let options = inner
                            .options
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        options.enable_pong
                    };
                    if pong_enabled {
                        inner.stats.record_pong_sent(1);
                    }
                    emit(inner, Event::Ping(data));
                }
                MessageKind::Pong => {
                    inner.stats.record_pong_received(1);
                    emit(inner, Event::Pong(data));
                }
                MessageKind::Fragment => {
                    emit(inner, Event::Fragment { wire_size });
                }
                // Closes arrive as TransportEvent::Closed
                MessageKind::Close => {}
            }
            invoke_traffic_tracker(wire_size, true);
        }
        TransportEvent::Closed {
            code,
            reason,
            remote,
        } => {
            tracing::debug!(code, remote, "websocket closed");
            emit(
                inner,
                Event::Close(CloseInfo {
                    code,
                    reason,
                    remote,
                }),
            );
        }
    }
}

fn emit(inner: &Arc<Inner>, event: Event) {
    let callback = inner
        .on_message
        .read()
        .ok()
        .and_then(|sink| sink.clone());
    if let Some(callback) = callback {
        callback(event);
    }
}

fn emit_error(inner: &Arc<Inner>, error: &Error, retries: u32, wait_time_ms: u64) {
    emit(
        inner,
        Event::Error(ErrorInfo {
            reason: error.to_string(),
            http_status: error.http_status(),
            retries,
            wait_time_ms,
            decompression_error: error.is_decompression_error(),
        }),
    );
}

/// Invoke the backpressure callback exactly once per threshold crossing,
/// in either direction.
fn check_backpressure(inner: &Arc<Inner>) {
    let threshold = {
        let options = inner
            .options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        options.backpressure_threshold
    };
    if threshold == 0 {
        return;
    }
    let buffered = inner
        .transport
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .as_ref()
        .map(|handle| handle.buffered_amount())
        .unwrap_or(0);
    let above = buffered >= threshold;
    let was_above = inner.backpressure_active.swap(above, Ordering::SeqCst);
    if above != was_above {
        let callback = inner
            .on_backpressure
            .read()
            .ok()
            .and_then(|sink| sink.clone());
        if let Some(callback) = callback {
            callback(buffered, above);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_defaults_to_closed() {
        let ws = WebSocket::new();
        assert_eq!(ws.ready_state(), ReadyState::Closed);
        assert_eq!(ws.buffered_amount(), 0);
    }

    #[test]
    fn sends_without_a_connection_fail() {
        let ws = WebSocket::new();
        assert!(!ws.send_text("nobody listening").success);
        assert!(!ws.send_binary(&[1u8, 2, 3]).success);
        assert!(!ws.ping("hb").success);
    }

    #[test]
    fn sub_protocol_management() {
        let ws = WebSocket::new();
        ws.add_sub_protocol("json");
        ws.add_sub_protocol("msgpack");
        assert_eq!(ws.sub_protocols(), vec!["json", "msgpack"]);
        ws.remove_sub_protocol("json");
        assert_eq!(ws.sub_protocols(), vec!["msgpack"]);
        ws.clear_sub_protocols();
        assert!(ws.sub_protocols().is_empty());
    }

    #[tokio::test]
    async fn stop_without_start_is_a_noop() {
        let ws = WebSocket::new();
        ws.stop().await;
        assert_eq!(ws.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn start_is_idempotent_while_running() {
        let ws = WebSocket::with_options(
            ClientOptions::new("ws://127.0.0.1:1").automatic_reconnection(true),
        );
        ws.on_message(|_event| {});
        ws.start();
        let first_task_running = ws
            .inner
            .task
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false);
        assert!(first_task_running);
        // Second start must not replace the running supervisor
        ws.start();
        ws.stop().await;
    }
}
