use crate::address::Address;
use crate::command::OutboundCommand;
use crate::interpret::value::Reading;
use crate::types::device::ModuleDetails;
use serde::Serialize;
use std::fmt;

/// Lifecycle of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// A measured or reported value from a sensor or actor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueUpdate {
    pub source: Address,
    pub target: Address,
    pub object: u16,
    pub reading: Reading,
}

/// A device confirmed (or rejected) a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAck {
    pub source: Address,
    pub object: u16,
    /// Sub-opcode of the command being acknowledged.
    pub command: u8,
    /// 0 means success, anything else is a device specific error code.
    pub status: u8,
}

impl DeviceAck {
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub source: Address,
    pub object: u16,
    pub state: u8,
    pub level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LcdText {
    pub source: Address,
    pub target: Address,
    pub line: u8,
    pub column: u8,
    pub text: String,
}

/// A command sent by another bus participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandObserved {
    pub source: Address,
    pub target: Address,
    pub object: u16,
    pub command: OutboundCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    ValueUpdate(ValueUpdate),
    Ack(DeviceAck),
    Status(StatusReport),
    DetailAck(ModuleDetails),
    LcdText(LcdText),
    CommandObserved(CommandObserved),
    AuthResult(AuthResult),
    ConnectionStateChanged(ConnectionState),
}
