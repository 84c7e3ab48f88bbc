//! # WaveSocket Core
//!
//! Core RFC 6455 implementation shared by the WaveSocket client and server
//! crates. It provides:
//!
//! - Error handling and close codes
//! - Bit-exact frame parsing and serialization
//! - The opening handshake for both roles, including `permessage-deflate`
//!   and sub-protocol negotiation
//! - Per-message DEFLATE (RFC 7692) with context takeover
//! - Message reassembly from fragments
//! - The byte-stream abstraction transports implement
//! - The transport state machine driving one connection

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub mod deflate;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod stream;
pub mod transport;

pub mod prelude;

pub use error::{CloseCode, Error, Result};
pub use frame::{Frame, FrameParser};
pub use message::{MessageAssembler, MessageKind, SendInfo};
pub use protocol::Opcode;
pub use stream::{ByteStream, CancelToken};
pub use transport::{
    PollResult, ReadyState, Role, Timeouts, Transport, TransportConfig, TransportEvent,
    TransportHandle,
};
