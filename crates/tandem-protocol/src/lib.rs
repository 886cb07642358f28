//! Tandem Protocol -- wire framing, command codes, payload codecs.
//!
//! Two plain TCP connections between orchestrator and federate. Every
//! message is one frame: a varint byte-length prefix followed by the body.
//! A command frame always precedes its payload frame.

pub mod channel;
pub mod command;
pub mod messages;
pub mod varint;

pub use channel::{ChannelListener, FramedChannel, RetryPolicy};
pub use command::Command;
pub use messages::*;

/// Protocol version carried in the Init payload. A mismatch aborts the
/// session during the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Sanity cap on frame bodies. The varint prefix can express up to
/// 2^28 - 1, but nothing in this protocol comes close.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed varint: continuation bit set past 4 bytes")]
    MalformedVarint,
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("message body incomplete: expected {expected} bytes, none arrived within the retry budget")]
    ReadIncomplete { expected: usize },
    #[error("message body size mismatch: expected {expected} bytes, got {got} within the retry budget")]
    BodySizeMismatch { expected: usize, got: usize },
    #[error("frame too large: {size} bytes (max {max})")]
    OversizedFrame { size: usize, max: usize },
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for errors that end the session. A payload decode error is the
    /// only kind the dispatcher may tolerate; everything else means the
    /// stream state is gone.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::Decode(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of payload")]
    UnexpectedEof,
    #[error("trailing bytes after payload")]
    TrailingBytes,
    #[error("invalid value for field `{field}`")]
    InvalidValue { field: &'static str },
}
