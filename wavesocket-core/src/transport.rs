//! Transport state machine
//!
//! A [`Transport`] owns one byte stream, the frame parser, the deflate
//! contexts, the reassembly buffer, the outbound send queue and the close
//! state. The owning task drives it with `poll()` / `dispatch()`; any
//! other task enqueues sends and close requests through the cloneable
//! [`TransportHandle`], which wakes the poll through an in-process
//! channel selected alongside socket readiness and the protocol timers.

use crate::deflate::{Compressor, Decompressor};
use crate::error::{CloseCode, Error, PayloadError, Result, TimeoutError};
use crate::frame::{parse_close_payload, validate_incoming, Frame};
use crate::message::{MessageAssembler, MessageKind, SendInfo};
use crate::protocol::{constants, Opcode};
use crate::stream::ByteStream;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use crate::deflate::DeflateConfig;
pub use crate::frame::Role;

/// Connection lifecycle state, mirroring the browser WebSocket API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReadyState {
    /// Connect or handshake in progress
    Connecting = 0,
    /// Handshake succeeded, traffic may flow
    Open = 1,
    /// A close frame has been sent or received
    Closing = 2,
    /// The socket has been released
    Closed = 3,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }
}

impl std::fmt::Display for ReadyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// Timeout knobs for one connection
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Send automatic pings at this cadence; `None` disables
    pub ping_interval: Option<Duration>,
    /// Close with 1011 when no pong arrives within this window of a ping
    pub ping_timeout: Option<Duration>,
    /// Close when no bytes have been read for this long
    pub idle_timeout: Option<Duration>,
    /// Abort a blocked write
    pub send_timeout: Duration,
    /// Bound the close handshake
    pub close_timeout: Duration,
    /// Bound the opening handshake (used by the connect paths)
    pub handshake_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ping_interval: None,
            ping_timeout: None,
            idle_timeout: None,
            send_timeout: Duration::from_secs(300),
            close_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl Timeouts {
    /// Ping cadence in seconds, `<= 0` disables
    pub fn ping_interval_secs(mut self, secs: i64) -> Self {
        self.ping_interval = positive_secs(secs);
        self
    }

    /// Pong deadline in seconds, `<= 0` disables
    pub fn ping_timeout_secs(mut self, secs: i64) -> Self {
        self.ping_timeout = positive_secs(secs);
        self
    }

    /// Idle window in seconds, `<= 0` disables
    pub fn idle_timeout_secs(mut self, secs: i64) -> Self {
        self.idle_timeout = positive_secs(secs);
        self
    }

    /// Write abort bound in seconds
    pub fn send_timeout_secs(mut self, secs: u64) -> Self {
        self.send_timeout = Duration::from_secs(secs);
        self
    }

    /// Close handshake bound in seconds
    pub fn close_timeout_secs(mut self, secs: u64) -> Self {
        self.close_timeout = Duration::from_secs(secs);
        self
    }

    /// Opening handshake bound in seconds
    pub fn handshake_timeout_secs(mut self, secs: u64) -> Self {
        self.handshake_timeout = Duration::from_secs(secs);
        self
    }
}

fn positive_secs(secs: i64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs as u64))
}

/// Per-connection configuration handed to [`Transport::new`]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Which side of the connection this endpoint plays
    pub role: Role,
    /// Negotiated permessage-deflate parameters, `None` when disabled
    pub deflate: Option<DeflateConfig>,
    /// Timeout knobs
    pub timeouts: Timeouts,
    /// Answer received pings with pongs automatically
    pub enable_pong: bool,
    /// Payload of automatic heartbeat pings
    pub ping_message: String,
    /// Largest frame accepted from the peer
    pub max_frame_size: usize,
    /// Largest reassembled (and inflated) message accepted
    pub max_message_size: usize,
}

impl TransportConfig {
    /// Config for the given role with everything else at defaults
    pub fn new(role: Role) -> Self {
        Self {
            role,
            deflate: None,
            timeouts: Timeouts::default(),
            enable_pong: true,
            ping_message: String::new(),
            max_frame_size: constants::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: constants::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Outbound message priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// FIFO order behind previously queued messages
    Normal,
    /// Drained before any queued normal-priority message
    High,
}

/// Kind of an outbound send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    /// Text message (payload must be valid UTF-8; `&str` senders are)
    Text,
    /// Binary message
    Binary,
    /// Ping control frame
    Ping,
    /// Pong control frame
    Pong,
}

/// Progress callback: `(bytes_written, wire_size)` once a queued message
/// reaches the socket
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// What `poll()` observed; the caller feeds it straight into `dispatch()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// Bytes arrived and were fed to the frame parser
    ReadyRead,
    /// A send was enqueued through the handle
    SendRequest,
    /// A close was requested through the handle
    CloseRequest,
    /// A protocol timer fired
    Timeout(TimeoutKind),
    /// The stream reached EOF, failed, or the transport is already closed
    Closed,
}

/// Which protocol timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Time to send an automatic ping
    Ping,
    /// No pong within the window of the last ping
    Pong,
    /// No bytes received within the idle window
    Idle,
    /// The close handshake did not finish in time
    CloseHandshake,
}

/// Event handed to the dispatch sink
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A complete message, a received control frame, or a fragment marker
    Message {
        /// Message kind; `Fragment` marks a received non-final data frame
        kind: MessageKind,
        /// Payload (empty for fragments)
        data: Bytes,
        /// Bytes the message occupied on the wire, pre-inflate
        wire_size: usize,
    },
    /// The connection reached `Closed`
    Closed {
        /// Close code (1006 when the connection dropped without one)
        code: u16,
        /// Close reason
        reason: String,
        /// The peer initiated the close handshake
        remote: bool,
    },
}

enum WakeToken {
    Send,
    Close,
}

struct OutFrame {
    bytes: Bytes,
    on_progress: Option<ProgressCallback>,
}

#[derive(Default)]
struct SendQueue {
    high: VecDeque<OutFrame>,
    normal: VecDeque<OutFrame>,
    compressor: Option<Compressor>,
    close_requested: Option<(u16, String)>,
}

struct Shared {
    ready_state: AtomicU8,
    buffered: AtomicUsize,
    queue: Mutex<SendQueue>,
    wake_tx: mpsc::UnboundedSender<WakeToken>,
    role: Role,
    deflate_negotiated: bool,
}

impl Shared {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    fn set_ready_state(&self, state: ReadyState) {
        self.ready_state.store(state as u8, Ordering::SeqCst);
    }
}

/// Cloneable application-side handle to a transport: enqueues sends and
/// close requests, observes ready state and buffered bytes.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("ready_state", &self.ready_state())
            .field("buffered_amount", &self.buffered_amount())
            .finish()
    }
}

impl TransportHandle {
    /// Current connection state
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// Sum of queued outbound wire bytes
    pub fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::SeqCst)
    }

    /// Serialize a message into the send queue and wake the poll loop.
    ///
    /// Compression and framing happen here, under the queue lock, so the
    /// deflate context advances in enqueue order and `buffered_amount`
    /// reflects exact wire bytes.
    pub fn send(
        &self,
        kind: SendKind,
        payload: &[u8],
        priority: Priority,
        on_progress: Option<ProgressCallback>,
    ) -> SendInfo {
        if self.shared.ready_state() != ReadyState::Open {
            return SendInfo::failed();
        }
        if matches!(kind, SendKind::Ping | SendKind::Pong)
            && payload.len() > constants::MAX_CONTROL_PAYLOAD
        {
            return SendInfo::failed();
        }

        let payload_size = payload.len();
        let mut compression_error = false;

        let wire_size = {
            let mut queue = match self.shared.queue.lock() {
                Ok(queue) => queue,
                Err(_) => return SendInfo::failed(),
            };

            let mut frame = match kind {
                SendKind::Text => Frame::text(payload.to_vec()),
                SendKind::Binary => Frame::binary(payload.to_vec()),
                SendKind::Ping => Frame::ping(payload.to_vec()),
                SendKind::Pong => Frame::pong(payload.to_vec()),
            };

            if matches!(kind, SendKind::Text | SendKind::Binary) {
                if let Some(compressor) = queue.compressor.as_mut() {
                    match compressor.compress(payload) {
                        Ok(compressed) => {
                            frame.payload = Bytes::from(compressed);
                            frame.rsv1 = true;
                        }
                        Err(_) => compression_error = true,
                    }
                }
            }

            if self.shared.role == Role::Client {
                frame = frame.with_mask();
            }

            let bytes = frame.to_bytes();
            let wire_size = bytes.len();
            let out = OutFrame { bytes, on_progress };
            match priority {
                Priority::Normal => queue.normal.push_back(out),
                Priority::High => queue.high.push_back(out),
            }
            self.shared.buffered.fetch_add(wire_size, Ordering::SeqCst);
            wire_size
        };

        if self.shared.wake_tx.send(WakeToken::Send).is_err() {
            return SendInfo::failed();
        }

        SendInfo {
            success: true,
            payload_size,
            wire_size,
            compression_error,
        }
    }

    /// Request the close handshake; idempotent.
    ///
    /// The state moves to `Closing` right away (as the browser API does),
    /// so later sends are rejected and a stop that races the request
    /// still waits for the handshake to finish.
    pub fn close(&self, code: u16, reason: &str) {
        match self.shared.ready_state() {
            ReadyState::Closed => return,
            ReadyState::Closing => return,
            _ => {}
        }
        if let Ok(mut queue) = self.shared.queue.lock() {
            if queue.close_requested.is_none() {
                queue.close_requested = Some((code, reason.to_string()));
            }
        }
        self.shared.set_ready_state(ReadyState::Closing);
        let _ = self.shared.wake_tx.send(WakeToken::Close);
    }
}

/// One WebSocket connection after a successful handshake
pub struct Transport {
    stream: Box<dyn ByteStream>,
    parser: crate::frame::FrameParser,
    assembler: MessageAssembler,
    decompressor: Option<Decompressor>,
    shared: Arc<Shared>,
    wake_rx: mpsc::UnboundedReceiver<WakeToken>,
    config: TransportConfig,

    last_recv_at: Instant,
    next_ping_at: Option<Instant>,
    pong_deadline: Option<Instant>,
    close_deadline: Option<Instant>,

    close_sent: bool,
    close_received: bool,
    peer_initiated_close: bool,
    close_code: u16,
    close_reason: String,
    closed_event_emitted: bool,
    io_error: Option<Error>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("role", &self.config.role)
            .field("ready_state", &self.shared.ready_state())
            .field("close_sent", &self.close_sent)
            .field("close_received", &self.close_received)
            .finish()
    }
}

impl Transport {
    /// Wrap a handshaken stream into a transport; the returned handle is
    /// what the application sends through.
    pub fn new(stream: Box<dyn ByteStream>, config: TransportConfig) -> (Self, TransportHandle) {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();

        let compressor = config
            .deflate
            .as_ref()
            .map(|deflate| Compressor::for_role(deflate, config.role));
        let decompressor = config
            .deflate
            .as_ref()
            .map(|deflate| Decompressor::for_role(deflate, config.role));

        let shared = Arc::new(Shared {
            ready_state: AtomicU8::new(ReadyState::Open as u8),
            buffered: AtomicUsize::new(0),
            queue: Mutex::new(SendQueue {
                compressor,
                ..SendQueue::default()
            }),
            wake_tx,
            role: config.role,
            deflate_negotiated: config.deflate.is_some(),
        });

        let now = Instant::now();
        let transport = Self {
            stream,
            parser: crate::frame::FrameParser::new(config.max_frame_size),
            assembler: MessageAssembler::new(),
            decompressor,
            shared: Arc::clone(&shared),
            wake_rx,
            next_ping_at: config.timeouts.ping_interval.map(|interval| now + interval),
            config,
            last_recv_at: now,
            pong_deadline: None,
            close_deadline: None,
            close_sent: false,
            close_received: false,
            peer_initiated_close: false,
            close_code: CloseCode::Abnormal.as_u16(),
            close_reason: String::new(),
            closed_event_emitted: false,
            io_error: None,
        };
        let handle = TransportHandle { shared };
        (transport, handle)
    }

    /// Current connection state
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// A fresh handle for this transport
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait for socket readability, a wake-up from the handle, or the
    /// nearest protocol timer.
    pub async fn poll(&mut self) -> PollResult {
        if self.shared.ready_state() == ReadyState::Closed {
            return PollResult::Closed;
        }

        let (deadline, timeout_kind) = self.next_deadline();

        enum Woken {
            Wake(Option<WakeToken>),
            Read(Result<usize>),
            Timer,
        }

        let mut buf = [0u8; 8192];
        let woken = tokio::select! {
            biased;
            token = self.wake_rx.recv() => Woken::Wake(token),
            read = self.stream.read(&mut buf) => Woken::Read(read),
            _ = sleep_until_opt(deadline) => Woken::Timer,
        };

        match woken {
            Woken::Wake(Some(WakeToken::Send)) => PollResult::SendRequest,
            Woken::Wake(Some(WakeToken::Close)) => PollResult::CloseRequest,
            Woken::Wake(None) => PollResult::Closed,
            Woken::Read(Ok(0)) => PollResult::Closed,
            Woken::Read(Ok(n)) => {
                self.parser.feed(&buf[..n]);
                self.last_recv_at = Instant::now();
                PollResult::ReadyRead
            }
            Woken::Read(Err(e)) => {
                self.io_error = Some(e);
                PollResult::Closed
            }
            Woken::Timer => PollResult::Timeout(timeout_kind),
        }
    }

    fn next_deadline(&self) -> (Option<Instant>, TimeoutKind) {
        let mut next: Option<(Instant, TimeoutKind)> = None;
        let mut consider = |deadline: Option<Instant>, kind: TimeoutKind| {
            if let Some(deadline) = deadline {
                if next.map(|(current, _)| deadline < current).unwrap_or(true) {
                    next = Some((deadline, kind));
                }
            }
        };

        consider(
            self.config
                .timeouts
                .idle_timeout
                .map(|idle| self.last_recv_at + idle),
            TimeoutKind::Idle,
        );
        consider(self.next_ping_at, TimeoutKind::Ping);
        consider(self.pong_deadline, TimeoutKind::Pong);
        consider(self.close_deadline, TimeoutKind::CloseHandshake);

        match next {
            Some((deadline, kind)) => (Some(deadline), kind),
            None => (None, TimeoutKind::Ping),
        }
    }

    /// Act on a poll result: drain the queue, run the close handshake,
    /// parse and dispatch incoming frames, or fire a timeout.
    ///
    /// Errors returned here have already shut the connection down (with a
    /// close frame where the RFC prescribes one); the caller reports them.
    pub async fn dispatch(
        &mut self,
        result: PollResult,
        sink: &mut (dyn FnMut(TransportEvent) + Send),
    ) -> Result<()> {
        match result {
            PollResult::SendRequest => self.drain_send_queue(sink).await,
            PollResult::CloseRequest => self.begin_close_handshake(sink).await,
            PollResult::ReadyRead => self.process_incoming(sink).await,
            PollResult::Timeout(kind) => self.handle_timeout(kind, sink).await,
            PollResult::Closed => {
                let error = self.io_error.take();
                self.finalize(sink, CloseCode::Abnormal.as_u16(), "connection lost", false)
                    .await;
                match error {
                    Some(error) => Err(error),
                    None => Ok(()),
                }
            }
        }
    }

    /// Send an automatic heartbeat ping right away (used on open when a
    /// ping interval is configured).
    pub async fn send_heartbeat(&mut self) -> Result<()> {
        let message = self.config.ping_message.clone();
        self.send_ping_now(message.as_bytes()).await
    }

    async fn send_ping_now(&mut self, payload: &[u8]) -> Result<()> {
        let mut frame = Frame::ping(payload.to_vec());
        if self.config.role == Role::Client {
            frame = frame.with_mask();
        }
        let bytes = frame.to_bytes();
        self.write_wire(&bytes).await?;
        if let Some(interval) = self.config.timeouts.ping_interval {
            self.next_ping_at = Some(Instant::now() + interval);
        }
        // The deadline tracks the oldest unanswered ping; a pong clears it.
        if self.pong_deadline.is_none() {
            if let Some(window) = self.config.timeouts.ping_timeout {
                self.pong_deadline = Some(Instant::now() + window);
            }
        }
        tracing::trace!(payload_len = payload.len(), "sent heartbeat ping");
        Ok(())
    }

    async fn drain_send_queue(&mut self, sink: &mut (dyn FnMut(TransportEvent) + Send)) -> Result<()> {
        loop {
            let out = {
                let mut queue = self
                    .shared
                    .queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                queue.high.pop_front().or_else(|| queue.normal.pop_front())
            };
            let Some(out) = out else { break };

            let wire_size = out.bytes.len();
            let written = self.write_wire(&out.bytes).await;
            self.shared.buffered.fetch_sub(wire_size, Ordering::SeqCst);
            match written {
                Ok(()) => {
                    if let Some(on_progress) = &out.on_progress {
                        on_progress(wire_size, wire_size);
                    }
                }
                Err(error) => {
                    self.finalize(sink, CloseCode::Abnormal.as_u16(), "write failed", false)
                        .await;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    async fn begin_close_handshake(&mut self, sink: &mut (dyn FnMut(TransportEvent) + Send)) -> Result<()> {
        if self.close_sent || self.shared.ready_state() == ReadyState::Closed {
            return Ok(());
        }
        let requested = {
            let mut queue = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            queue.close_requested.take()
        };
        let (code, reason) =
            requested.unwrap_or((CloseCode::Normal.as_u16(), String::new()));

        if let Err(error) = self.send_close_frame(code, &reason).await {
            self.finalize(sink, CloseCode::Abnormal.as_u16(), "write failed", false)
                .await;
            return Err(error);
        }
        self.close_code = code;
        self.close_reason = reason;
        self.shared.set_ready_state(ReadyState::Closing);
        self.close_deadline = Some(Instant::now() + self.config.timeouts.close_timeout);
        tracing::debug!(code, "close handshake initiated");
        Ok(())
    }

    async fn process_incoming(&mut self, sink: &mut (dyn FnMut(TransportEvent) + Send)) -> Result<()> {
        loop {
            let frame = match self.parser.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(error) => {
                    let code = error.close_code().unwrap_or(CloseCode::ProtocolError);
                    return self.fail(sink, code, error).await;
                }
            };

            if let Err(violation) = validate_incoming(
                &frame,
                self.config.role,
                self.shared.deflate_negotiated,
            ) {
                return self
                    .fail(sink, CloseCode::ProtocolError, violation.into())
                    .await;
            }

            match frame.opcode {
                Opcode::Ping => {
                    let wire_size = frame.wire_size();
                    if self.config.enable_pong && !self.close_sent {
                        let mut pong = Frame::pong(frame.payload.clone());
                        if self.config.role == Role::Client {
                            pong = pong.with_mask();
                        }
                        let bytes = pong.to_bytes();
                        if let Err(error) = self.write_wire(&bytes).await {
                            self.finalize(sink, CloseCode::Abnormal.as_u16(), "write failed", false)
                                .await;
                            return Err(error);
                        }
                    }
                    sink(TransportEvent::Message {
                        kind: MessageKind::Ping,
                        data: frame.payload,
                        wire_size,
                    });
                }
                Opcode::Pong => {
                    self.pong_deadline = None;
                    sink(TransportEvent::Message {
                        kind: MessageKind::Pong,
                        wire_size: frame.wire_size(),
                        data: frame.payload,
                    });
                }
                Opcode::Close => {
                    return self.handle_close_frame(frame, sink).await;
                }
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    if !frame.fin {
                        sink(TransportEvent::Message {
                            kind: MessageKind::Fragment,
                            data: Bytes::new(),
                            wire_size: frame.wire_size(),
                        });
                    }
                    let assembled = match self.assembler.feed(&frame) {
                        Ok(Some(assembled)) => assembled,
                        Ok(None) => {
                            if self.assembler.buffered_bytes() > self.config.max_message_size {
                                return self
                                    .fail(
                                        sink,
                                        CloseCode::TooBig,
                                        PayloadError::MessageTooLarge {
                                            max: self.config.max_message_size,
                                        }
                                        .into(),
                                    )
                                    .await;
                            }
                            continue;
                        }
                        Err(violation) => {
                            return self
                                .fail(sink, CloseCode::ProtocolError, violation.into())
                                .await;
                        }
                    };

                    if assembled.data.len() > self.config.max_message_size {
                        return self
                            .fail(
                                sink,
                                CloseCode::TooBig,
                                PayloadError::MessageTooLarge {
                                    max: self.config.max_message_size,
                                }
                                .into(),
                            )
                            .await;
                    }

                    let data = if assembled.compressed {
                        // validate_incoming only lets RSV1 through when the
                        // extension was negotiated, so the context exists.
                        match self.decompressor.as_mut() {
                            Some(decompressor) => match decompressor
                                .decompress(&assembled.data, self.config.max_message_size)
                            {
                                Ok(inflated) => Bytes::from(inflated),
                                Err(error) => {
                                    return self
                                        .fail(sink, CloseCode::InvalidPayload, error)
                                        .await;
                                }
                            },
                            None => {
                                return self
                                    .fail(
                                        sink,
                                        CloseCode::ProtocolError,
                                        crate::error::ProtocolError::ReservedBitsSet.into(),
                                    )
                                    .await;
                            }
                        }
                    } else {
                        assembled.data.freeze()
                    };

                    if assembled.kind == MessageKind::Text
                        && std::str::from_utf8(&data).is_err()
                    {
                        return self
                            .fail(
                                sink,
                                CloseCode::InvalidPayload,
                                PayloadError::InvalidUtf8.into(),
                            )
                            .await;
                    }

                    sink(TransportEvent::Message {
                        kind: assembled.kind,
                        data,
                        wire_size: assembled.wire_size,
                    });
                }
            }
        }
    }

    async fn handle_close_frame(
        &mut self,
        frame: Frame,
        sink: &mut (dyn FnMut(TransportEvent) + Send),
    ) -> Result<()> {
        let (code, reason) = match parse_close_payload(&frame.payload) {
            Ok(parsed) => parsed,
            Err(violation) => {
                return self
                    .fail(sink, CloseCode::ProtocolError, violation.into())
                    .await;
            }
        };

        self.close_received = true;
        let code = code.unwrap_or(CloseCode::NoStatus.as_u16());

        if !self.close_sent {
            // Peer initiated: echo its code (1000 when it sent none). The
            // echo is best effort, the peer may have gone away already.
            self.peer_initiated_close = true;
            self.shared.set_ready_state(ReadyState::Closing);
            let echo_code = if code == CloseCode::NoStatus.as_u16() {
                CloseCode::Normal.as_u16()
            } else {
                code
            };
            let _ = self.send_close_frame(echo_code, &reason).await;
        }

        self.close_code = code;
        self.close_reason = reason;

        // Close sent and received in both orders lands here: handshake done.
        let (code, reason, remote) = (
            self.close_code,
            self.close_reason.clone(),
            self.peer_initiated_close,
        );
        self.finalize(sink, code, &reason, remote).await;
        Ok(())
    }

    async fn handle_timeout(
        &mut self,
        kind: TimeoutKind,
        sink: &mut (dyn FnMut(TransportEvent) + Send),
    ) -> Result<()> {
        match kind {
            TimeoutKind::Ping => {
                let message = self.config.ping_message.clone();
                if let Err(error) = self.send_ping_now(message.as_bytes()).await {
                    self.finalize(sink, CloseCode::Abnormal.as_u16(), "write failed", false)
                        .await;
                    return Err(error);
                }
                Ok(())
            }
            TimeoutKind::Pong => {
                let timeout = self
                    .config
                    .timeouts
                    .ping_timeout
                    .unwrap_or_default();
                self.fail(
                    sink,
                    CloseCode::Internal,
                    TimeoutError::Pong { timeout }.into(),
                )
                .await
            }
            TimeoutKind::Idle => {
                let timeout = self
                    .config
                    .timeouts
                    .idle_timeout
                    .unwrap_or_default();
                // The peer went quiet; do not wait for a close handshake.
                self.finalize(sink, CloseCode::Abnormal.as_u16(), "idle timeout", false)
                    .await;
                Err(TimeoutError::Idle { timeout }.into())
            }
            TimeoutKind::CloseHandshake => {
                let (code, reason) = (self.close_code, self.close_reason.clone());
                tracing::debug!("close handshake timed out, releasing socket");
                self.finalize(sink, code, &reason, self.peer_initiated_close)
                    .await;
                Ok(())
            }
        }
    }

    /// Emit a close frame for `code`, release the socket and report the
    /// error. Used for protocol and payload violations.
    async fn fail(
        &mut self,
        sink: &mut (dyn FnMut(TransportEvent) + Send),
        code: CloseCode,
        error: Error,
    ) -> Result<()> {
        if !self.close_sent {
            // Best effort: the peer may already be gone.
            let _ = self.send_close_frame(code.as_u16(), &error.to_string()).await;
        }
        self.finalize(sink, code.as_u16(), &error.to_string(), false)
            .await;
        Err(error)
    }

    async fn send_close_frame(&mut self, code: u16, reason: &str) -> Result<()> {
        let mut frame = Frame::close(Some(code), reason);
        if self.config.role == Role::Client {
            frame = frame.with_mask();
        }
        let bytes = frame.to_bytes();
        self.write_wire(&bytes).await?;
        self.close_sent = true;
        Ok(())
    }

    /// Transition to `Closed`, release the socket and emit the `Closed`
    /// event exactly once.
    async fn finalize(
        &mut self,
        sink: &mut (dyn FnMut(TransportEvent) + Send),
        code: u16,
        reason: &str,
        remote: bool,
    ) {
        if self.shared.ready_state() != ReadyState::Closed {
            self.shared.set_ready_state(ReadyState::Closed);
        }
        let _ = self.stream.close().await;
        self.assembler.clear();
        self.parser.clear();
        self.close_deadline = None;
        self.pong_deadline = None;
        self.next_ping_at = None;

        if !self.closed_event_emitted {
            self.closed_event_emitted = true;
            sink(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
                remote,
            });
        }
    }

    async fn write_wire(&mut self, bytes: &[u8]) -> Result<()> {
        let send_timeout = self.config.timeouts.send_timeout;
        let write = async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        };
        match tokio::time::timeout(send_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError::Send {
                timeout: send_timeout,
            }
            .into()),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
