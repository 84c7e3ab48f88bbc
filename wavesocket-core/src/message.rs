//! Message model and fragment reassembly
//!
//! A message is one application-level datagram, possibly carried by several
//! frames. [`MessageAssembler`] owns the reassembly state machine of the
//! transport: it tracks the opcode of the message in progress, accumulates
//! fragment payloads and wire sizes, and enforces the RFC 6455
//! fragmentation sequencing rules.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::protocol::Opcode;
use bytes::BytesMut;

/// Kind of a complete message handed to the application sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Complete text message
    Text,
    /// Complete binary message
    Binary,
    /// Ping control message
    Ping,
    /// Pong control message
    Pong,
    /// Close control message
    Close,
    /// A non-final data frame contributing to a message in progress
    Fragment,
}

/// Result of a send call: whether the message was accepted, and its
/// payload and wire sizes (wire size is post-compression).
#[derive(Debug, Clone, Copy, Default)]
pub struct SendInfo {
    /// The message was accepted into the send queue
    pub success: bool,
    /// Application payload size in bytes
    pub payload_size: usize,
    /// Bytes that will hit the wire (header, mask, compressed payload)
    pub wire_size: usize,
    /// Compressing the payload failed and it was sent uncompressed
    pub compression_error: bool,
}

impl SendInfo {
    /// A rejected send
    pub fn failed() -> Self {
        Self::default()
    }
}

/// A complete data message produced by reassembly
#[derive(Debug)]
pub struct AssembledMessage {
    /// Text or Binary
    pub kind: MessageKind,
    /// Concatenated payload of every fragment, still compressed if the
    /// first frame carried RSV1
    pub data: BytesMut,
    /// Sum of the wire sizes of the contributing frames
    pub wire_size: usize,
    /// The first frame carried the compression marker
    pub compressed: bool,
}

/// Reassembles fragmented messages from a stream of data frames.
///
/// Control frames never enter the assembler: the transport handles them
/// directly, interleaved or not.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    current: Option<Opcode>,
    compressed: bool,
    wire_size: usize,
}

impl MessageAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one data frame (text, binary or continuation).
    ///
    /// Returns a complete message on fin=1, `None` while a message is
    /// still in progress, and a protocol error on sequencing violations.
    pub fn feed(&mut self, frame: &Frame) -> Result<Option<AssembledMessage>, ProtocolError> {
        debug_assert!(frame.opcode.is_data());

        match (frame.opcode, self.current) {
            // First frame of a message
            (Opcode::Text | Opcode::Binary, None) => {
                self.current = Some(frame.opcode);
                self.compressed = frame.rsv1;
            }
            // A new data message may not start while one is in progress
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                return Err(ProtocolError::InterleavedDataFrame);
            }
            (Opcode::Continuation, Some(_)) => {}
            (Opcode::Continuation, None) => {
                return Err(ProtocolError::UnexpectedContinuation);
            }
            _ => unreachable!("control frames never reach the assembler"),
        }

        self.buffer.extend_from_slice(&frame.payload);
        self.wire_size += frame.wire_size();

        if !frame.fin {
            return Ok(None);
        }

        let kind = match self.current.take() {
            Some(Opcode::Text) => MessageKind::Text,
            _ => MessageKind::Binary,
        };
        let message = AssembledMessage {
            kind,
            data: std::mem::take(&mut self.buffer),
            wire_size: std::mem::take(&mut self.wire_size),
            compressed: std::mem::replace(&mut self.compressed, false),
        };
        Ok(Some(message))
    }

    /// A fragmented message is in progress
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Bytes accumulated so far
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial message (used when tearing a connection down)
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.current = None;
        self.compressed = false;
        self.wire_size = 0;
    }
}
