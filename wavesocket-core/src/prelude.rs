//! Common imports for working with the core crate

pub use crate::deflate::DeflateConfig;
pub use crate::error::{CloseCode, Error, Result};
pub use crate::frame::{Frame, FrameParser, Role};
pub use crate::message::{MessageKind, SendInfo};
pub use crate::protocol::Opcode;
pub use crate::stream::{ByteStream, CancelToken};
pub use crate::transport::{
    PollResult, Priority, ReadyState, SendKind, Timeouts, Transport, TransportConfig,
    TransportEvent, TransportHandle,
};
