//! Payload structs and their fixed binary layout.
//!
//! Fields are big-endian fixed-width, written with `bytes::BufMut`. Decode
//! is strict: short payloads and out-of-range discriminants are errors, and
//! the channel rejects frames with bytes left over after decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::DecodeError;

/// A message body that follows a command frame on the wire.
pub trait Payload: Sized {
    fn encode(&self, dst: &mut BytesMut);
    fn decode(src: &mut Bytes) -> Result<Self, DecodeError>;
}

fn need(src: &impl Buf, n: usize) -> Result<(), DecodeError> {
    if src.remaining() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(())
}

fn get_bool(src: &mut impl Buf, field: &'static str) -> Result<bool, DecodeError> {
    need(src, 1)?;
    match src.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(DecodeError::InvalidValue { field }),
    }
}

fn get_u32(src: &mut impl Buf) -> Result<u32, DecodeError> {
    need(src, 4)?;
    Ok(src.get_u32())
}

fn get_i32(src: &mut impl Buf) -> Result<i32, DecodeError> {
    need(src, 4)?;
    Ok(src.get_i32())
}

fn get_i64(src: &mut impl Buf) -> Result<i64, DecodeError> {
    need(src, 8)?;
    Ok(src.get_i64())
}

fn get_f64(src: &mut impl Buf) -> Result<f64, DecodeError> {
    need(src, 8)?;
    Ok(src.get_f64())
}

/// What kind of node an AddNode creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Radio,
    Wired,
    /// Cell base station. Can only be added before the first advance.
    Enb,
}

impl NodeKind {
    fn code(self) -> u8 {
        match self {
            NodeKind::Radio => 1,
            NodeKind::Wired => 2,
            NodeKind::Enb => 3,
        }
    }

    fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            1 => Ok(NodeKind::Radio),
            2 => Ok(NodeKind::Wired),
            3 => Ok(NodeKind::Enb),
            _ => Err(DecodeError::InvalidValue { field: "node_kind" }),
        }
    }
}

/// Handshake payload. Times are absolute simulation nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Init {
    pub protocol_version: u32,
    pub start_time: i64,
    pub end_time: i64,
}

impl Payload for Init {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.protocol_version);
        dst.put_i64(self.start_time);
        dst.put_i64(self.end_time);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            protocol_version: get_u32(src)?,
            start_time: get_i64(src)?,
            end_time: get_i64(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddNode {
    pub time: i64,
    pub node_id: u32,
    pub kind: NodeKind,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Payload for AddNode {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
        dst.put_u8(self.kind.code());
        dst.put_f64(self.x);
        dst.put_f64(self.y);
        dst.put_f64(self.z);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let time = get_i64(src)?;
        let node_id = get_u32(src)?;
        need(src, 1)?;
        let kind = NodeKind::from_code(src.get_u8())?;
        Ok(Self {
            time,
            node_id,
            kind,
            x: get_f64(src)?,
            y: get_f64(src)?,
            z: get_f64(src)?,
        })
    }
}

/// One position update inside a batched UpdateNode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeMove {
    pub node_id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

const NODE_MOVE_WIRE_LEN: usize = 4 + 3 * 8;

/// Batched position updates, all taking effect at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateNode {
    pub time: i64,
    pub moves: Vec<NodeMove>,
}

impl Payload for UpdateNode {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.moves.len() as u32);
        for m in &self.moves {
            dst.put_u32(m.node_id);
            dst.put_f64(m.x);
            dst.put_f64(m.y);
            dst.put_f64(m.z);
        }
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        let time = get_i64(src)?;
        let count = get_u32(src)? as usize;
        // Reject the count before allocating for it
        need(src, count * NODE_MOVE_WIRE_LEN)?;
        let mut moves = Vec::with_capacity(count);
        for _ in 0..count {
            moves.push(NodeMove {
                node_id: get_u32(src)?,
                x: get_f64(src)?,
                y: get_f64(src)?,
                z: get_f64(src)?,
            });
        }
        Ok(Self { time, moves })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveNode {
    pub time: i64,
    pub node_id: u32,
}

impl Payload for RemoveNode {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            time: get_i64(src)?,
            node_id: get_u32(src)?,
        })
    }
}

/// Wifi radio configuration. Transmit power in milliwatts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigureWifiRadio {
    pub time: i64,
    pub node_id: u32,
    pub radio_on: bool,
    pub ip_address: u32,
    pub transmit_power_mw: f64,
}

impl Payload for ConfigureWifiRadio {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
        dst.put_u8(u8::from(self.radio_on));
        dst.put_u32(self.ip_address);
        dst.put_f64(self.transmit_power_mw);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            time: get_i64(src)?,
            node_id: get_u32(src)?,
            radio_on: get_bool(src, "radio_on")?,
            ip_address: get_u32(src)?,
            transmit_power_mw: get_f64(src)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureCellRadio {
    pub time: i64,
    pub node_id: u32,
    pub radio_on: bool,
    pub ip_address: u32,
}

impl Payload for ConfigureCellRadio {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
        dst.put_u8(u8::from(self.radio_on));
        dst.put_u32(self.ip_address);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            time: get_i64(src)?,
            node_id: get_u32(src)?,
            radio_on: get_bool(src, "radio_on")?,
            ip_address: get_u32(src)?,
        })
    }
}

/// Outbound transmission request. The preceding command selects wifi/cell.
/// `length` is the payload size to simulate; no actual payload crosses the
/// coupling, only the message id for correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendMessage {
    pub time: i64,
    pub node_id: u32,
    pub dest_address: u32,
    pub message_id: u32,
    pub length: u32,
}

impl Payload for SendMessage {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
        dst.put_u32(self.dest_address);
        dst.put_u32(self.message_id);
        dst.put_u32(self.length);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            time: get_i64(src)?,
            node_id: get_u32(src)?,
            dest_address: get_u32(src)?,
            message_id: get_u32(src)?,
            length: get_u32(src)?,
        })
    }
}

/// Delivery report sent back to the orchestrator. `rssi` is meaningful for
/// wifi receipts and zero for cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveMessage {
    pub time: i64,
    pub node_id: u32,
    pub message_id: u32,
    pub rssi: i32,
}

impl Payload for ReceiveMessage {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
        dst.put_u32(self.node_id);
        dst.put_u32(self.message_id);
        dst.put_i32(self.rssi);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self {
            time: get_i64(src)?,
            node_id: get_u32(src)?,
            message_id: get_u32(src)?,
            rssi: get_i32(src)?,
        })
    }
}

/// Bare timestamp. Used by ADVANCE_TIME, END and NEXT_EVENT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMessage {
    pub time: i64,
}

impl Payload for TimeMessage {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_i64(self.time);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self { time: get_i64(src)? })
    }
}

/// Sent once at startup: the bound command port, announced on the notify
/// channel before the orchestrator connects to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortExchange {
    pub port: u32,
}

impl Payload for PortExchange {
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u32(self.port);
    }

    fn decode(src: &mut Bytes) -> Result<Self, DecodeError> {
        Ok(Self { port: get_u32(src)? })
    }
}
