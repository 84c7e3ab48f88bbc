//! Error types for WaveSocket
//!
//! One top-level [`Error`] covers every failure class the library can
//! produce: protocol violations, handshake rejections, proxy tunnel
//! failures, payload problems, timeouts, I/O and cancellation. The
//! supervisor maps these onto the error events it reports to the
//! application.

#![allow(missing_docs)]

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for WaveSocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for WaveSocket operations
#[derive(Error, Debug)]
pub enum Error {
    /// RFC 6455 protocol violations detected on received frames
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Frame parsing errors
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Opening handshake errors
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Proxy tunnel errors (HTTP CONNECT, SOCKS5)
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// Payload errors (invalid UTF-8, decompression failure)
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Timeout errors
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors from the underlying stream
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the byte stream
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// The endpoint was stopped by the application
    #[error("stopped by application")]
    Stopped,

    /// Catch-all with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// The close code this error maps to when the transport must emit a
    /// close frame before shutting the connection down.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Error::Protocol(_) | Error::Frame(_) => Some(CloseCode::ProtocolError),
            Error::Payload(_) => Some(CloseCode::InvalidPayload),
            Error::Timeout(TimeoutError::Pong { .. }) => Some(CloseCode::Internal),
            _ => None,
        }
    }

    /// HTTP status attached to the error, if any (handshake failures)
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Handshake(e) => e.http_status(),
            _ => 0,
        }
    }

    /// Whether the error was caused by a failed payload decompression
    pub fn is_decompression_error(&self) -> bool {
        matches!(self, Error::Payload(PayloadError::Decompression(_)))
    }
}

/// RFC 6455 violations detected while receiving frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown or reserved opcode
    #[error("invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved bits set without a negotiated extension
    #[error("reserved bits set in frame")]
    ReservedBitsSet,

    /// Control frame payload above the 125 byte limit
    #[error("control frame payload too large: {0} bytes")]
    OversizeControlFrame(usize),

    /// Control frame with fin=0
    #[error("control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Continuation frame without a message in progress
    #[error("continuation frame without a started message")]
    UnexpectedContinuation,

    /// Text/binary frame while a fragmented message is in progress
    #[error("data frame interleaved into a fragmented message")]
    InterleavedDataFrame,

    /// A server received an unmasked frame from a client
    #[error("client frame is not masked")]
    UnmaskedClientFrame,

    /// A client received a masked frame from a server
    #[error("server frame is masked")]
    MaskedServerFrame,

    /// Close frame carried an invalid close code
    #[error("invalid close code: {0}")]
    InvalidCloseCode(u16),
}

/// Frame parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered to parse a complete frame
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData { needed: usize, have: usize },

    /// Frame exceeds the configured maximum
    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Opening handshake errors
#[derive(Error, Debug, Clone)]
pub enum HandshakeError {
    /// A required header is absent
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    /// A header carried an unacceptable value
    #[error("invalid {header} header: {value}")]
    InvalidHeader { header: &'static str, value: String },

    /// The server answered with something other than 101
    #[error("expecting status 101 (Switching Protocols), got {0}")]
    UnexpectedStatus(u16),

    /// `Sec-WebSocket-Accept` did not match the sent key
    #[error("invalid Sec-WebSocket-Accept value")]
    InvalidAcceptKey,

    /// The peer speaks an HTTP version we do not upgrade from
    #[error("expecting HTTP/1.1, got {0}")]
    InvalidHttpVersion(String),

    /// The client used a method other than GET
    #[error("invalid HTTP method, need GET, got {0}")]
    InvalidMethod(String),

    /// `Sec-WebSocket-Version` is not 13
    #[error("invalid Sec-WebSocket-Version, need 13, got {0}")]
    UnsupportedVersion(String),

    /// A request or status line could not be parsed
    #[error("malformed {0}")]
    Malformed(&'static str),

    /// Headers exceeded the 8 KiB cap
    #[error("handshake headers too large")]
    HeadersTooLarge,

    /// The deflate contexts could not be initialized
    #[error("failed to initialize per-message deflate: {0}")]
    DeflateInit(String),
}

impl HandshakeError {
    /// HTTP status carried by the failure, 0 when none applies.
    pub fn http_status(&self) -> u16 {
        match self {
            HandshakeError::UnexpectedStatus(status) => *status,
            HandshakeError::MissingHeader(_)
            | HandshakeError::InvalidHeader { .. }
            | HandshakeError::InvalidMethod(_)
            | HandshakeError::InvalidHttpVersion(_)
            | HandshakeError::UnsupportedVersion(_)
            | HandshakeError::Malformed(_)
            | HandshakeError::HeadersTooLarge => 400,
            HandshakeError::InvalidAcceptKey | HandshakeError::DeflateInit(_) => 0,
        }
    }
}

/// Proxy tunnel errors
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// The HTTP proxy answered CONNECT with a non-200 status
    #[error("proxy CONNECT failed with status: {0}")]
    ConnectStatus(u16),

    /// The proxy status line could not be parsed
    #[error("malformed proxy response: {0}")]
    MalformedResponse(String),

    /// The SOCKS server answered with the wrong protocol version
    #[error("invalid SOCKS5 version in response: {0:#x}")]
    Socks5Version(u8),

    /// The SOCKS server rejected every offered auth method
    #[error("SOCKS5 server rejected all auth methods")]
    Socks5NoAcceptableAuth,

    /// The SOCKS server requires credentials we do not have
    #[error("SOCKS5 server requires auth but no credentials provided")]
    Socks5AuthRequired,

    /// Username/password sub-negotiation failed
    #[error("SOCKS5 authentication failed")]
    Socks5AuthFailed,

    /// The SOCKS connect request was refused
    #[error("SOCKS5 connect failed: {0}")]
    Socks5Reply(&'static str),
}

/// Payload errors raised after reassembly
#[derive(Error, Debug, Clone)]
pub enum PayloadError {
    /// A complete text message is not valid UTF-8
    #[error("invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Inflating a compressed message failed
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Deflating an outgoing payload failed
    #[error("compression failed: {0}")]
    Compression(String),

    /// An inflated message exceeded the configured maximum
    #[error("decompressed message too large: over {max} bytes")]
    MessageTooLarge { max: usize },
}

/// Timeout errors
#[derive(Error, Debug, Clone)]
pub enum TimeoutError {
    /// Connect did not complete in time
    #[error("connect timed out after {timeout:?}")]
    Connect { timeout: Duration },

    /// The opening handshake did not complete in time
    #[error("handshake timed out after {timeout:?}")]
    Handshake { timeout: Duration },

    /// A blocked write was aborted
    #[error("send timed out after {timeout:?}")]
    Send { timeout: Duration },

    /// The close handshake did not complete in time
    #[error("close handshake timed out after {timeout:?}")]
    Close { timeout: Duration },

    /// No bytes were received for the configured idle window
    #[error("no data received in {timeout:?}, closing (idle timeout)")]
    Idle { timeout: Duration },

    /// No pong arrived within the window of the last ping
    #[error("no pong received within {timeout:?} of last ping, closing (ping timeout)")]
    Pong { timeout: Duration },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// A field holds an unusable value
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    /// A URL could not be parsed
    #[error("unable to parse url: {0}")]
    InvalidUrl(String),

    /// Connect was attempted without a URL configured
    #[error("no url configured")]
    MissingUrl,

    /// Cross-field validation failed
    #[error("{0}")]
    Validation(String),
}

/// WebSocket close codes as defined in RFC 6455 section 7.4
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure
    Normal,
    /// 1001: going away
    Away,
    /// 1002: protocol error
    ProtocolError,
    /// 1003: unsupported data
    Unsupported,
    /// 1005: no status received (never sent on the wire)
    NoStatus,
    /// 1006: abnormal closure (never sent on the wire)
    Abnormal,
    /// 1007: invalid frame payload data
    InvalidPayload,
    /// 1008: policy violation
    PolicyViolation,
    /// 1009: message too big
    TooBig,
    /// 1010: mandatory extension missing
    MandatoryExtension,
    /// 1011: internal error
    Internal,
    /// 1015: TLS handshake failure (never sent on the wire)
    TlsHandshake,
    /// 3000-4999: application-defined close code
    Application(u16),
}

impl CloseCode {
    /// Map a wire code onto a [`CloseCode`]
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::NoStatus,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::InvalidPayload,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::TooBig,
            1010 => CloseCode::MandatoryExtension,
            1011 => CloseCode::Internal,
            1015 => CloseCode::TlsHandshake,
            code if (3000..=4999).contains(&code) => CloseCode::Application(code),
            _ => CloseCode::ProtocolError,
        }
    }

    /// The numeric wire value
    pub fn as_u16(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::NoStatus => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidPayload => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::TooBig => 1009,
            CloseCode::MandatoryExtension => 1010,
            CloseCode::Internal => 1011,
            CloseCode::TlsHandshake => 1015,
            CloseCode::Application(code) => *code,
        }
    }

    /// Codes that must never appear in a close frame payload
    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            CloseCode::NoStatus | CloseCode::Abnormal | CloseCode::TlsHandshake
        )
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}
