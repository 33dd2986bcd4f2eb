//! Turns decoded packets into typed events.
//!
//! Dispatch is by opcode first, then by the sub-opcode in the first data byte.
//! Every sub-opcode arm owns its own decode function.

pub mod value;

use crate::address::Address;
use crate::command::{CommandError, OutboundCommand};
use crate::packet::Packet;
use crate::proto::*;
use crate::types::device::ModuleDetails;
use crate::types::events::{
    AuthResult, CommandObserved, DeviceAck, Event, LcdText, StatusReport, ValueUpdate,
};
use log::{debug, trace};
use std::collections::HashMap;
use thiserror::Error;

pub use value::{ClockFlags, ClockReading, InputHardware, Quantity, Reading, TagPresence, TagRead};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("sub-opcode {sub_opcode:#04x} needs {needed} data bytes, got {got}")]
    Truncated {
        sub_opcode: u8,
        needed: usize,
        got: usize,
    },
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubOpcode {
    Set,
    Increment,
    Decrement,
    Toggle,
    Dim,
    Lock,
    RequestValue,
    EnableConfiguration,
    PlayTrack,
    SendSms,
    SetLcdText,
    Firmware,
    RequestDetails,
    ValueAck,
    Ack,
    Status,
    DetailAck,
    AuthGranted,
    AuthDenied,
}

impl TryFrom<u8> for SubOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            D0_SET => SubOpcode::Set,
            D0_INC => SubOpcode::Increment,
            D0_DEC => SubOpcode::Decrement,
            D0_TOGGLE => SubOpcode::Toggle,
            D0_DIM => SubOpcode::Dim,
            D0_LOCK => SubOpcode::Lock,
            D0_REQ_VALUE => SubOpcode::RequestValue,
            D0_ENABLE_CONFIG => SubOpcode::EnableConfiguration,
            D0_PLAY_TRACK => SubOpcode::PlayTrack,
            D0_SEND_SMS => SubOpcode::SendSms,
            D0_SET_LCD_TEXT => SubOpcode::SetLcdText,
            D0_FIRMWARE => SubOpcode::Firmware,
            D0_REQ_DETAIL => SubOpcode::RequestDetails,
            D0_VALUE_ACK => SubOpcode::ValueAck,
            D0_ACK => SubOpcode::Ack,
            D0_STATUS => SubOpcode::Status,
            D0_DETAIL_ACK => SubOpcode::DetailAck,
            D0_AUTH_GRANTED => SubOpcode::AuthGranted,
            D0_AUTH_DENIED => SubOpcode::AuthDenied,
            other => return Err(other),
        })
    }
}

/// Why a packet produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    UnknownOpcode(u8),
    UnknownSubOpcode(u8),
    NoData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Event(Event),
    Keepalive,
    Ignored(Ignored),
}

/// Last generic value seen per `(source, object)`, used to report deltas.
#[derive(Debug, Default, Clone)]
pub struct ValueHistory {
    last: HashMap<(Address, u16), u16>,
}

impl ValueHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` and returns the change from the previous one.
    pub fn record(&mut self, source: Address, object: u16, value: u16) -> Option<i32> {
        self.last
            .insert((source, object), value)
            .map(|prev| i32::from(value) - i32::from(prev))
    }

    pub fn last(&self, source: Address, object: u16) -> Option<u16> {
        self.last.get(&(source, object)).copied()
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}

/// Source and target of a telegram in the namespace its opcode implies.
pub fn endpoints(packet: &Packet) -> (Address, Address) {
    match packet.opcode {
        OP_MODULE => (
            Address::Module(packet.addr_src),
            Address::Module(packet.addr_dst),
        ),
        _ => (
            Address::from_wire(packet.addr_src),
            Address::from_wire(packet.addr_dst),
        ),
    }
}

pub fn interpret(
    packet: &Packet,
    history: &mut ValueHistory,
) -> Result<Interpretation, InterpretError> {
    match packet.opcode {
        OP_KEEPALIVE => return Ok(Interpretation::Keepalive),
        OP_OBJECT | OP_MODULE | OP_HANDSHAKE => {}
        other => {
            debug!(target: "Client/Recv", "Ignoring packet with unknown opcode {other:#04x}");
            return Ok(Interpretation::Ignored(Ignored::UnknownOpcode(other)));
        }
    }

    let Some(&first) = packet.data.first() else {
        trace!(target: "Client/Recv", "Packet without data: {packet}");
        return Ok(Interpretation::Ignored(Ignored::NoData));
    };
    let sub = match SubOpcode::try_from(first) {
        Ok(sub) => sub,
        Err(code) => {
            debug!(target: "Client/Recv", "Ignoring unknown sub-opcode {code:#04x} in {packet}");
            return Ok(Interpretation::Ignored(Ignored::UnknownSubOpcode(code)));
        }
    };

    // Auth results only mean something as the gateway's answer to the handshake.
    if matches!(sub, SubOpcode::AuthGranted | SubOpcode::AuthDenied)
        && packet.opcode != OP_HANDSHAKE
    {
        debug!(target: "Client/Recv", "Ignoring auth code outside handshake: {packet}");
        return Ok(Interpretation::Ignored(Ignored::UnknownSubOpcode(first)));
    }

    let data = packet.data.as_slice();
    let event = match sub {
        SubOpcode::ValueAck => decode_value(packet, history)?,
        SubOpcode::Ack => decode_ack(packet, data)?,
        SubOpcode::Status => decode_status(packet, data)?,
        SubOpcode::DetailAck => decode_detail_ack(packet, data)?,
        SubOpcode::AuthGranted => Event::AuthResult(AuthResult { accepted: true }),
        SubOpcode::AuthDenied => Event::AuthResult(AuthResult { accepted: false }),
        SubOpcode::SetLcdText => decode_lcd_text(packet, data)?,
        SubOpcode::Set
        | SubOpcode::Increment
        | SubOpcode::Decrement
        | SubOpcode::Toggle
        | SubOpcode::Dim
        | SubOpcode::Lock
        | SubOpcode::RequestValue
        | SubOpcode::EnableConfiguration
        | SubOpcode::PlayTrack
        | SubOpcode::SendSms
        | SubOpcode::Firmware
        | SubOpcode::RequestDetails => decode_observed_command(packet, data)?,
    };
    Ok(Interpretation::Event(event))
}

fn need(data: &[u8], needed: usize) -> Result<(), InterpretError> {
    if data.len() < needed {
        return Err(InterpretError::Truncated {
            sub_opcode: data.first().copied().unwrap_or_default(),
            needed,
            got: data.len(),
        });
    }
    Ok(())
}

fn decode_value(packet: &Packet, history: &mut ValueHistory) -> Result<Event, InterpretError> {
    let (source, target) = endpoints(packet);
    let reading = value::decode_value_ack(source, packet.obj_src, &packet.data, history)?;
    Ok(Event::ValueUpdate(ValueUpdate {
        source,
        target,
        object: packet.obj_src,
        reading,
    }))
}

fn decode_ack(packet: &Packet, data: &[u8]) -> Result<Event, InterpretError> {
    need(data, 3)?;
    let (source, _) = endpoints(packet);
    Ok(Event::Ack(DeviceAck {
        source,
        object: packet.obj_src,
        command: data[1],
        status: data[2],
    }))
}

fn decode_status(packet: &Packet, data: &[u8]) -> Result<Event, InterpretError> {
    need(data, 2)?;
    let (source, _) = endpoints(packet);
    Ok(Event::Status(StatusReport {
        source,
        object: packet.obj_src,
        state: data[1],
        level: data.get(2).copied(),
    }))
}

/// Detail acks always describe the sending module, whatever the opcode.
fn decode_detail_ack(packet: &Packet, data: &[u8]) -> Result<Event, InterpretError> {
    need(data, 6)?;
    Ok(Event::DetailAck(ModuleDetails {
        module: Address::Module(packet.addr_src),
        hardware_type: data[1],
        sensor_count: data[2],
        actor_count: data[3],
        firmware: (data[4], data[5]),
    }))
}

fn decode_lcd_text(packet: &Packet, data: &[u8]) -> Result<Event, InterpretError> {
    let (source, target) = endpoints(packet);
    match OutboundCommand::decode(data)? {
        OutboundCommand::SetLcdText { line, column, text } => Ok(Event::LcdText(LcdText {
            source,
            target,
            line,
            column,
            text,
        })),
        other => Err(InterpretError::InvalidField {
            field: "sub-opcode",
            reason: format!("expected LCD text, decoded {other:?}"),
        }),
    }
}

fn decode_observed_command(packet: &Packet, data: &[u8]) -> Result<Event, InterpretError> {
    let (source, target) = endpoints(packet);
    let command = OutboundCommand::decode(data)?;
    Ok(Event::CommandObserved(CommandObserved {
        source,
        target,
        object: packet.obj_src,
        command,
    }))
}
