//! WebSocket frame parsing and serialization
//!
//! Bit-exact RFC 6455 codec. [`Frame::parse`] consumes complete frames from
//! a buffer and reports [`FrameError::InsufficientData`] when more bytes are
//! needed, which [`FrameParser`] uses for incremental parsing off a socket.

use crate::error::{Error, FrameError, ProtocolError, Result};
use crate::protocol::{constants, frame_bits::*, Opcode};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Which side of the connection this endpoint plays.
///
/// Clients mask every outgoing frame and reject masked incoming frames;
/// servers do the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connecting endpoint: masks outgoing frames
    Client,
    /// Accepting endpoint: never masks outgoing frames
    Server,
}

/// One RFC 6455 protocol data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final frame of a message
    pub fin: bool,
    /// Compression marker under permessage-deflate
    pub rsv1: bool,
    /// Reserved, must be zero
    pub rsv2: bool,
    /// Reserved, must be zero
    pub rsv3: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Masking key, present on client-to-server frames
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a final, unmasked frame
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a continuation frame
    pub fn continuation(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Continuation, payload)
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Create a close frame carrying an optional code and reason.
    ///
    /// The reason is truncated to fit the 125-byte control payload limit.
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = BytesMut::new();
        if let Some(code) = code {
            payload.put_u16(code);
            let mut reason = reason;
            if reason.len() > constants::MAX_CLOSE_REASON {
                let mut cut = constants::MAX_CLOSE_REASON;
                while !reason.is_char_boundary(cut) {
                    cut -= 1;
                }
                reason = &reason[..cut];
            }
            payload.put_slice(reason.as_bytes());
        }
        Self::new(Opcode::Close, payload.freeze())
    }

    /// Set the FIN bit
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Set the RSV1 (compressed) bit
    pub fn with_rsv1(mut self, rsv1: bool) -> Self {
        self.rsv1 = rsv1;
        self
    }

    /// Apply a fresh random masking key (client-to-server frames)
    pub fn with_mask(mut self) -> Self {
        self.mask = Some(rand::random::<[u8; 4]>());
        self
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 14);
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Serialize the frame, masking the payload on the wire if a key is set
    pub fn write_to(&self, buf: &mut BytesMut) {
        let first = ((self.fin as u8) << 7)
            | ((self.rsv1 as u8) << 6)
            | ((self.rsv2 as u8) << 5)
            | ((self.rsv3 as u8) << 4)
            | self.opcode.as_u8();
        buf.put_u8(first);

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        let len = self.payload.len();
        if len < PAYLOAD_LEN_16 as usize {
            buf.put_u8(mask_bit | len as u8);
        } else if len <= u16::MAX as usize {
            buf.put_u8(mask_bit | PAYLOAD_LEN_16);
            buf.put_u16(len as u16);
        } else {
            buf.put_u8(mask_bit | PAYLOAD_LEN_64);
            buf.put_u64(len as u64);
        }

        match self.mask {
            Some(mask) => {
                buf.put_slice(&mask);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask(&mut buf[start..], &mask);
            }
            None => buf.put_slice(&self.payload),
        }
    }

    /// Parse one frame from the front of `buf`, consuming its bytes.
    ///
    /// Masked payloads are unmasked. When the buffer does not yet hold a
    /// complete frame it is left untouched and
    /// [`FrameError::InsufficientData`] is returned.
    pub fn parse(buf: &mut BytesMut, max_frame_size: usize) -> Result<Self> {
        let need = |needed: usize, have: usize| -> Error {
            FrameError::InsufficientData { needed, have }.into()
        };

        if buf.len() < 2 {
            return Err(need(2, buf.len()));
        }

        let b0 = buf[0];
        let b1 = buf[1];

        let fin = b0 & FIN_BIT != 0;
        let rsv1 = b0 & RSV1_BIT != 0;
        let rsv2 = b0 & RSV2_BIT != 0;
        let rsv3 = b0 & RSV3_BIT != 0;
        let opcode_raw = b0 & OPCODE_MASK;
        let opcode = Opcode::from_u8(opcode_raw)
            .ok_or(Error::Protocol(ProtocolError::InvalidOpcode(opcode_raw)))?;

        let masked = b1 & MASK_BIT != 0;
        let len7 = b1 & PAYLOAD_LEN_MASK;

        let (payload_len, mut offset) = match len7 {
            PAYLOAD_LEN_16 => {
                if buf.len() < 4 {
                    return Err(need(4, buf.len()));
                }
                (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
            }
            PAYLOAD_LEN_64 => {
                if buf.len() < 10 {
                    return Err(need(10, buf.len()));
                }
                let mut len_bytes = [0u8; 8];
                len_bytes.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len_bytes) as usize, 10)
            }
            n => (n as usize, 2),
        };

        if payload_len > max_frame_size {
            return Err(FrameError::TooLarge {
                size: payload_len,
                max: max_frame_size,
            }
            .into());
        }

        let mask = if masked {
            if buf.len() < offset + 4 {
                return Err(need(offset + 4, buf.len()));
            }
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            Some(mask)
        } else {
            None
        };

        if buf.len() < offset + payload_len {
            return Err(need(offset + payload_len, buf.len()));
        }

        buf.advance(offset);
        let mut payload = buf.split_to(payload_len);
        if let Some(mask) = mask {
            apply_mask(&mut payload, &mask);
        }

        Ok(Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask,
            payload: payload.freeze(),
        })
    }

    /// The wire size of this frame: header, mask and payload
    pub fn wire_size(&self) -> usize {
        let len = self.payload.len();
        let header = if len < PAYLOAD_LEN_16 as usize {
            2
        } else if len <= u16::MAX as usize {
            4
        } else {
            10
        };
        header + if self.mask.is_some() { 4 } else { 0 } + len
    }

    /// Close, ping and pong frames
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }
}

/// XOR `data` with the rotating 4-byte key, in place
pub fn apply_mask(data: &mut [u8], mask: &[u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Validate a received frame against the RFC invariants this endpoint's
/// role imposes. Returns the violation to answer with close code 1002.
pub fn validate_incoming(
    frame: &Frame,
    role: Role,
    deflate_negotiated: bool,
) -> std::result::Result<(), ProtocolError> {
    if frame.is_control() {
        if !frame.fin {
            return Err(ProtocolError::FragmentedControlFrame);
        }
        if frame.payload.len() > constants::MAX_CONTROL_PAYLOAD {
            return Err(ProtocolError::OversizeControlFrame(frame.payload.len()));
        }
    }

    // RSV1 is legal only on the first frame of a data message when
    // permessage-deflate was negotiated; RSV2/RSV3 never are.
    let rsv1_allowed = deflate_negotiated
        && matches!(frame.opcode, Opcode::Text | Opcode::Binary);
    if frame.rsv2 || frame.rsv3 || (frame.rsv1 && !rsv1_allowed) {
        return Err(ProtocolError::ReservedBitsSet);
    }

    match role {
        Role::Server if frame.mask.is_none() => Err(ProtocolError::UnmaskedClientFrame),
        Role::Client if frame.mask.is_some() => Err(ProtocolError::MaskedServerFrame),
        _ => Ok(()),
    }
}

/// Decode a close frame payload into `(code, reason)`.
///
/// An empty payload means no status was received (1005 by convention);
/// a single-byte payload and reserved codes are protocol errors.
pub fn parse_close_payload(
    payload: &[u8],
) -> std::result::Result<(Option<u16>, String), ProtocolError> {
    match payload.len() {
        0 => Ok((None, String::new())),
        1 => Err(ProtocolError::InvalidCloseCode(payload[0] as u16)),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if code < 1000 || crate::error::CloseCode::from_u16(code).is_reserved() {
                return Err(ProtocolError::InvalidCloseCode(code));
            }
            let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
            Ok((Some(code), reason))
        }
    }
}

/// Incremental frame parser fed from socket reads
#[derive(Debug)]
pub struct FrameParser {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(constants::DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameParser {
    /// Create a parser enforcing `max_frame_size` on received frames
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append raw bytes read from the socket
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete frame, or `None` when more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        match Frame::parse(&mut self.buffer, self.max_frame_size) {
            Ok(frame) => Ok(Some(frame)),
            Err(Error::Frame(FrameError::InsufficientData { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes (used when tearing a connection down)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) -> Frame {
        let bytes = frame.to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);
        let parsed = Frame::parse(&mut buf, usize::MAX).unwrap();
        assert!(buf.is_empty(), "parser left {} bytes", buf.len());
        parsed
    }

    #[test]
    fn text_frame_wire_format() {
        let bytes = Frame::text("hello").to_bytes();
        assert_eq!(bytes[0], 0x81); // FIN=1, opcode=1
        assert_eq!(bytes[1], 0x05); // MASK=0, len=5
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn masked_frame_unmasks_on_parse() {
        let frame = Frame::text("hello").with_mask();
        let bytes = frame.to_bytes();
        assert_eq!(bytes[1] & 0x80, 0x80);
        assert_eq!(bytes.len(), 2 + 4 + 5);
        // Wire payload differs from the cleartext
        assert_ne!(&bytes[6..], b"hello");

        let parsed = roundtrip(frame);
        assert_eq!(&parsed.payload[..], b"hello");
        assert!(parsed.mask.is_some());
    }

    #[test]
    fn fresh_mask_per_frame() {
        let a = Frame::text("x").with_mask();
        let b = Frame::text("x").with_mask();
        // Statistically a 1 in 2^32 false failure; acceptable for a unit test
        assert_ne!(a.mask, b.mask);
    }

    #[test]
    fn length_encoding_boundaries() {
        for len in [0usize, 1, 125, 126, 127, 65535, 65536] {
            let frame = Frame::binary(vec![0xAB; len]);
            let bytes = frame.to_bytes();
            match len {
                0..=125 => assert_eq!(bytes[1] as usize, len),
                126..=65535 => {
                    assert_eq!(bytes[1], 126);
                    assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]) as usize, len);
                }
                _ => {
                    assert_eq!(bytes[1], 127);
                    let mut len_bytes = [0u8; 8];
                    len_bytes.copy_from_slice(&bytes[2..10]);
                    assert_eq!(u64::from_be_bytes(len_bytes) as usize, len);
                }
            }
            let parsed = roundtrip(frame);
            assert_eq!(parsed.payload.len(), len);
        }
    }

    #[test]
    fn parse_is_incremental() {
        let mut parser = FrameParser::default();
        let bytes = Frame::text("stream me").with_mask().to_bytes();

        parser.feed(&bytes[..1]);
        assert!(parser.next_frame().unwrap().is_none());
        parser.feed(&bytes[1..7]);
        assert!(parser.next_frame().unwrap().is_none());
        parser.feed(&bytes[7..]);
        let frame = parser.next_frame().unwrap().unwrap();
        assert_eq!(&frame.payload[..], b"stream me");
        assert!(parser.next_frame().unwrap().is_none());
    }

    #[test]
    fn two_frames_in_one_read() {
        let mut parser = FrameParser::default();
        let mut wire = Frame::text("one").to_bytes().to_vec();
        wire.extend_from_slice(&Frame::ping("hb").to_bytes());
        parser.feed(&wire);

        let first = parser.next_frame().unwrap().unwrap();
        assert_eq!(first.opcode, Opcode::Text);
        let second = parser.next_frame().unwrap().unwrap();
        assert_eq!(second.opcode, Opcode::Ping);
        assert!(parser.next_frame().unwrap().is_none());
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut buf = BytesMut::from(&[0x83u8, 0x00][..]); // opcode 0x3
        match Frame::parse(&mut buf, usize::MAX) {
            Err(Error::Protocol(ProtocolError::InvalidOpcode(0x3))) => {}
            other => panic!("expected invalid opcode, got {:?}", other),
        }
    }

    #[test]
    fn oversize_control_frame_rejected() {
        let ping = Frame::ping(vec![0u8; 126]);
        let err = validate_incoming(&ping, Role::Client, false).unwrap_err();
        assert_eq!(err, ProtocolError::OversizeControlFrame(126));
    }

    #[test]
    fn fragmented_control_frame_rejected() {
        let ping = Frame::ping("x").with_fin(false);
        let err = validate_incoming(&ping, Role::Client, false).unwrap_err();
        assert_eq!(err, ProtocolError::FragmentedControlFrame);
    }

    #[test]
    fn masking_direction_enforced() {
        let unmasked = Frame::text("x");
        let masked = Frame::text("x").with_mask();

        // Server must receive masked frames
        assert_eq!(
            validate_incoming(&unmasked, Role::Server, false),
            Err(ProtocolError::UnmaskedClientFrame)
        );
        assert!(validate_incoming(&masked, Role::Server, false).is_ok());

        // Client must receive unmasked frames
        assert_eq!(
            validate_incoming(&masked, Role::Client, false),
            Err(ProtocolError::MaskedServerFrame)
        );
        assert!(validate_incoming(&unmasked, Role::Client, false).is_ok());
    }

    #[test]
    fn rsv_bits_require_deflate() {
        let compressed = Frame::text("x").with_rsv1(true);
        assert_eq!(
            validate_incoming(&compressed, Role::Client, false),
            Err(ProtocolError::ReservedBitsSet)
        );
        assert!(validate_incoming(&compressed, Role::Client, true).is_ok());

        // RSV1 on a continuation frame is never legal
        let cont = Frame::continuation("x").with_rsv1(true);
        assert_eq!(
            validate_incoming(&cont, Role::Client, true),
            Err(ProtocolError::ReservedBitsSet)
        );
    }

    #[test]
    fn close_payload_decoding() {
        assert_eq!(parse_close_payload(&[]).unwrap(), (None, String::new()));

        let frame = Frame::close(Some(1000), "bye");
        let (code, reason) = parse_close_payload(&frame.payload).unwrap();
        assert_eq!(code, Some(1000));
        assert_eq!(reason, "bye");

        // One-byte payload is malformed
        assert!(parse_close_payload(&[0x03]).is_err());
        // Reserved code 1005 must not appear on the wire
        assert!(parse_close_payload(&1005u16.to_be_bytes()).is_err());
    }

    #[test]
    fn frame_too_large_rejected() {
        let bytes = Frame::binary(vec![0u8; 1024]).to_bytes();
        let mut buf = BytesMut::from(&bytes[..]);
        match Frame::parse(&mut buf, 512) {
            Err(Error::Frame(FrameError::TooLarge { size: 1024, max: 512 })) => {}
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn wire_size_matches_serialization() {
        for len in [0usize, 125, 126, 65535, 65536] {
            let frame = Frame::binary(vec![1u8; len]);
            assert_eq!(frame.wire_size(), frame.to_bytes().len());
            let masked = Frame::binary(vec![1u8; len]).with_mask();
            assert_eq!(masked.wire_size(), masked.to_bytes().len());
        }
    }
}
