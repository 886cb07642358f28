//! Framed TCP channel: one varint-prefixed frame per message.
//!
//! The coupling uses two of these, one per direction. All reads and writes
//! on a channel happen from the single dispatcher task, so there is never a
//! concurrent writer to interleave frame boundaries.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::command::Command;
use crate::messages::Payload;
use crate::varint::{put_varint, varint_len, MAX_VARINT_BYTES};
use crate::{varint, ProtocolError, MAX_BODY_BYTES};

/// Recovery policy for message bodies that trail their length prefix.
///
/// The peer may flush prefix and body in separate TCP segments under load,
/// so a short first read is polled a bounded number of times before the
/// read fails. The defaults mirror the reference coupling (1s poll, 3
/// retries); neither constant is load-bearing protocol semantics.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub poll_timeout: Duration,
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            retries: 3,
        }
    }
}

/// A bound-but-not-yet-accepted channel endpoint. Binding and accepting are
/// separate steps because the bound port may need to be announced to the
/// peer (see `PortExchange`) before the peer can connect.
pub struct ChannelListener {
    listener: TcpListener,
}

impl ChannelListener {
    /// Bind on `host:port`. Port 0 requests an ephemeral port; use
    /// `local_port` to learn the assignment.
    pub async fn bind(host: &str, port: u16) -> Result<Self, ProtocolError> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> Result<u16, ProtocolError> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept one connection (blocking). The listener is consumed: a
    /// channel is never re-accepted mid-session.
    pub async fn accept(self, retry: RetryPolicy) -> Result<FramedChannel, ProtocolError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%peer, "channel accepted");
        Ok(FramedChannel { stream, retry })
    }
}

/// One direction of the coupling: typed reads and writes of framed messages
/// over a live TCP stream.
pub struct FramedChannel {
    stream: TcpStream,
    retry: RetryPolicy,
}

impl FramedChannel {
    /// Connect to a listening peer (the orchestrator side of a channel).
    pub async fn connect(host: &str, port: u16, retry: RetryPolicy) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream, retry })
    }

    /// Read one command frame.
    pub async fn read_command(&mut self) -> Result<Command, ProtocolError> {
        let mut body = self.read_frame().await?;
        let code = varint::get_varint(&mut body)?;
        if body.has_remaining() {
            return Err(ProtocolError::Decode(crate::DecodeError::TrailingBytes));
        }
        let cmd = Command::from_code(code);
        tracing::trace!(%cmd, "read command");
        Ok(cmd)
    }

    /// Read one payload frame and decode it as `P`.
    ///
    /// A decode failure does not corrupt framing state: the frame was
    /// consumed in full, and the next read starts at the next boundary.
    pub async fn read_message<P: Payload>(&mut self) -> Result<P, ProtocolError> {
        let mut body = self.read_frame().await?;
        let msg = P::decode(&mut body)?;
        if body.has_remaining() {
            return Err(ProtocolError::Decode(crate::DecodeError::TrailingBytes));
        }
        Ok(msg)
    }

    /// Write one command frame.
    pub async fn write_command(&mut self, cmd: Command) -> Result<(), ProtocolError> {
        tracing::trace!(%cmd, "write command");
        let mut body = BytesMut::with_capacity(MAX_VARINT_BYTES);
        put_varint(&mut body, cmd.code());
        self.write_frame(&body).await
    }

    /// Write one payload frame.
    pub async fn write_message<P: Payload>(&mut self, msg: &P) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        msg.encode(&mut body);
        self.write_frame(&body).await
    }

    async fn read_frame(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.read_varint_prefix().await? as usize;
        if len > MAX_BODY_BYTES {
            return Err(ProtocolError::OversizedFrame {
                size: len,
                max: MAX_BODY_BYTES,
            });
        }
        self.read_body(len).await
    }

    /// Read the varint length prefix one byte at a time.
    async fn read_varint_prefix(&mut self) -> Result<u32, ProtocolError> {
        let mut value: u32 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.stream.read_u8().await.map_err(closed_on_eof)?;
            value |= u32::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::MalformedVarint)
    }

    /// Read exactly `len` body bytes, tolerating a bounded stall between
    /// prefix and body. Each poll window that passes without progress
    /// consumes one retry; exhaustion with nothing read is `ReadIncomplete`,
    /// exhaustion part-way through is `BodySizeMismatch`.
    async fn read_body(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if len == 0 {
            return Ok(Bytes::new());
        }
        let mut body = vec![0u8; len];
        let mut filled = 0;
        let mut polls_left = self.retry.retries + 1;
        while filled < len {
            match timeout(self.retry.poll_timeout, self.stream.read(&mut body[filled..])).await {
                Ok(Ok(0)) => return Err(ProtocolError::ConnectionClosed),
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(ProtocolError::Io(e)),
                Err(_) => {
                    polls_left -= 1;
                    if polls_left == 0 {
                        if filled == 0 {
                            return Err(ProtocolError::ReadIncomplete { expected: len });
                        }
                        return Err(ProtocolError::BodySizeMismatch {
                            expected: len,
                            got: filled,
                        });
                    }
                    tracing::warn!(
                        have = filled,
                        want = len,
                        polls_left,
                        "message body stalled, polling again"
                    );
                }
            }
        }
        Ok(Bytes::from(body))
    }

    /// Prefix + body as one logical write, flushed before returning.
    async fn write_frame(&mut self, body: &[u8]) -> Result<(), ProtocolError> {
        let mut frame = BytesMut::with_capacity(varint_len(body.len() as u32) + body.len());
        put_varint(&mut frame, body.len() as u32);
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

fn closed_on_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}
