//! The closed command set. One command frame precedes every payload frame.

use std::fmt;

/// Commands travelling on either channel. Codes are fixed wire values;
/// anything outside the table decodes to `Unrecognized` and is never
/// silently coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    ShutDown,
    Success,
    NextEvent,
    AdvanceTime,
    End,
    AddNode,
    UpdateNode,
    RemoveNode,
    ConfWifiRadio,
    SendWifiMsg,
    RecvWifiMsg,
    ConfCellRadio,
    SendCellMsg,
    RecvCellMsg,
    /// Sentinel for codes outside the table. Carries the raw value for logs.
    Unrecognized(u32),
}

impl Command {
    /// Wire code for this command.
    pub fn code(self) -> u32 {
        match self {
            Command::Unrecognized(raw) => raw,
            Command::Init => 1,
            Command::ShutDown => 2,
            Command::Success => 3,
            Command::NextEvent => 4,
            Command::AdvanceTime => 5,
            Command::End => 6,
            Command::AddNode => 7,
            Command::UpdateNode => 8,
            Command::RemoveNode => 9,
            Command::ConfWifiRadio => 10,
            Command::SendWifiMsg => 11,
            Command::RecvWifiMsg => 12,
            Command::ConfCellRadio => 13,
            Command::SendCellMsg => 14,
            Command::RecvCellMsg => 15,
        }
    }

    /// Map a wire code back to a command.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Command::Init,
            2 => Command::ShutDown,
            3 => Command::Success,
            4 => Command::NextEvent,
            5 => Command::AdvanceTime,
            6 => Command::End,
            7 => Command::AddNode,
            8 => Command::UpdateNode,
            9 => Command::RemoveNode,
            10 => Command::ConfWifiRadio,
            11 => Command::SendWifiMsg,
            12 => Command::RecvWifiMsg,
            13 => Command::ConfCellRadio,
            14 => Command::SendCellMsg,
            15 => Command::RecvCellMsg,
            raw => Command::Unrecognized(raw),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unrecognized(raw) => write!(f, "UNRECOGNIZED({raw})"),
            Command::Init => f.write_str("INIT"),
            Command::ShutDown => f.write_str("SHUT_DOWN"),
            Command::Success => f.write_str("SUCCESS"),
            Command::NextEvent => f.write_str("NEXT_EVENT"),
            Command::AdvanceTime => f.write_str("ADVANCE_TIME"),
            Command::End => f.write_str("END"),
            Command::AddNode => f.write_str("ADD_NODE"),
            Command::UpdateNode => f.write_str("UPDATE_NODE"),
            Command::RemoveNode => f.write_str("REMOVE_NODE"),
            Command::ConfWifiRadio => f.write_str("CONF_WIFI_RADIO"),
            Command::SendWifiMsg => f.write_str("SEND_WIFI_MSG"),
            Command::RecvWifiMsg => f.write_str("RECV_WIFI_MSG"),
            Command::ConfCellRadio => f.write_str("CONF_CELL_RADIO"),
            Command::SendCellMsg => f.write_str("SEND_CELL_MSG"),
            Command::RecvCellMsg => f.write_str("RECV_CELL_MSG"),
        }
    }
}
