//! Outbound commands and their payload layout.
//!
//! The same layouts show up inbound when another bus participant sends a
//! command, so every variant can be decoded as well as encoded.

use crate::address::Address;
use crate::packet::{MAX_DATA_LEN, Packet};
use crate::proto::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_DIM_LEVEL: u8 = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("payload for sub-opcode {sub_opcode:#04x} is truncated")]
    Truncated { sub_opcode: u8 },
    #[error("sub-opcode {0:#04x} is not a command")]
    NotACommand(u8),
    #[error("empty payload")]
    Empty,
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("command payload is {0} bytes, more than a packet can carry")]
    PayloadTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareOp {
    Begin { size: u32 },
    Block { index: u16, data: Vec<u8> },
    Commit { checksum: u32 },
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundCommand {
    Set { value: u16 },
    Increment { step: u8 },
    Decrement { step: u8 },
    Toggle,
    Dim { level: u8, ramp_secs: u8 },
    Lock { locked: bool },
    RequestValue,
    EnableConfiguration { enabled: bool },
    PlayTrack { track: u16, volume: u8 },
    SendSms { number: String, text: String },
    SetLcdText { line: u8, column: u8, text: String },
    Firmware(FirmwareOp),
    RequestDetails,
}

/// Characters outside Latin-1 become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn bool_byte(v: bool) -> u8 {
    u8::from(v)
}

fn need(data: &[u8], len: usize) -> Result<()> {
    if data.len() < len {
        Err(CommandError::Truncated {
            sub_opcode: data.first().copied().unwrap_or_default(),
        })
    } else {
        Ok(())
    }
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl OutboundCommand {
    pub fn sub_opcode(&self) -> u8 {
        match self {
            OutboundCommand::Set { .. } => D0_SET,
            OutboundCommand::Increment { .. } => D0_INC,
            OutboundCommand::Decrement { .. } => D0_DEC,
            OutboundCommand::Toggle => D0_TOGGLE,
            OutboundCommand::Dim { .. } => D0_DIM,
            OutboundCommand::Lock { .. } => D0_LOCK,
            OutboundCommand::RequestValue => D0_REQ_VALUE,
            OutboundCommand::EnableConfiguration { .. } => D0_ENABLE_CONFIG,
            OutboundCommand::PlayTrack { .. } => D0_PLAY_TRACK,
            OutboundCommand::SendSms { .. } => D0_SEND_SMS,
            OutboundCommand::SetLcdText { .. } => D0_SET_LCD_TEXT,
            OutboundCommand::Firmware(_) => D0_FIRMWARE,
            OutboundCommand::RequestDetails => D0_REQ_DETAIL,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.sub_opcode()];
        match self {
            OutboundCommand::Set { value } => out.extend_from_slice(&value.to_be_bytes()),
            OutboundCommand::Increment { step } | OutboundCommand::Decrement { step } => {
                out.push(*step)
            }
            OutboundCommand::Toggle
            | OutboundCommand::RequestValue
            | OutboundCommand::RequestDetails => {}
            OutboundCommand::Dim { level, ramp_secs } => {
                if *level > MAX_DIM_LEVEL {
                    return Err(CommandError::InvalidField {
                        field: "dim level",
                        reason: format!("{level} exceeds {MAX_DIM_LEVEL}"),
                    });
                }
                out.extend_from_slice(&[*level, *ramp_secs]);
            }
            OutboundCommand::Lock { locked } => out.push(bool_byte(*locked)),
            OutboundCommand::EnableConfiguration { enabled } => out.push(bool_byte(*enabled)),
            OutboundCommand::PlayTrack { track, volume } => {
                out.extend_from_slice(&track.to_be_bytes());
                out.push(*volume);
            }
            OutboundCommand::SendSms { number, text } => {
                if number.is_empty()
                    || !number
                        .chars()
                        .all(|c| c.is_ascii_digit() || c == '+')
                {
                    return Err(CommandError::InvalidField {
                        field: "sms number",
                        reason: format!("{number:?} is not a phone number"),
                    });
                }
                out.push(number.len() as u8);
                out.extend_from_slice(number.as_bytes());
                out.extend_from_slice(&encode_latin1(text));
            }
            OutboundCommand::SetLcdText { line, column, text } => {
                out.extend_from_slice(&[*line, *column]);
                out.extend_from_slice(&encode_latin1(text));
            }
            OutboundCommand::Firmware(op) => match op {
                FirmwareOp::Begin { size } => {
                    out.push(FW_BEGIN);
                    out.extend_from_slice(&size.to_be_bytes());
                }
                FirmwareOp::Block { index, data } => {
                    out.push(FW_BLOCK);
                    out.extend_from_slice(&index.to_be_bytes());
                    out.extend_from_slice(data);
                }
                FirmwareOp::Commit { checksum } => {
                    out.push(FW_COMMIT);
                    out.extend_from_slice(&checksum.to_be_bytes());
                }
                FirmwareOp::Abort => out.push(FW_ABORT),
            },
        }

        if out.len() > MAX_DATA_LEN {
            return Err(CommandError::PayloadTooLarge(out.len()));
        }
        Ok(out)
    }

    /// Reads a command payload, sub-opcode included.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let sub_opcode = *data.first().ok_or(CommandError::Empty)?;
        let cmd = match sub_opcode {
            D0_SET => {
                need(data, 3)?;
                OutboundCommand::Set {
                    value: be16(data, 1),
                }
            }
            D0_INC => {
                need(data, 2)?;
                OutboundCommand::Increment { step: data[1] }
            }
            D0_DEC => {
                need(data, 2)?;
                OutboundCommand::Decrement { step: data[1] }
            }
            D0_TOGGLE => OutboundCommand::Toggle,
            D0_DIM => {
                need(data, 3)?;
                OutboundCommand::Dim {
                    level: data[1],
                    ramp_secs: data[2],
                }
            }
            D0_LOCK => {
                need(data, 2)?;
                OutboundCommand::Lock {
                    locked: data[1] != 0,
                }
            }
            D0_REQ_VALUE => OutboundCommand::RequestValue,
            D0_ENABLE_CONFIG => {
                need(data, 2)?;
                OutboundCommand::EnableConfiguration {
                    enabled: data[1] != 0,
                }
            }
            D0_PLAY_TRACK => {
                need(data, 4)?;
                OutboundCommand::PlayTrack {
                    track: be16(data, 1),
                    volume: data[3],
                }
            }
            D0_SEND_SMS => {
                need(data, 2)?;
                let number_len = usize::from(data[1]);
                need(data, 2 + number_len)?;
                let number = std::str::from_utf8(&data[2..2 + number_len])
                    .map_err(|e| CommandError::InvalidField {
                        field: "sms number",
                        reason: e.to_string(),
                    })?
                    .to_string();
                OutboundCommand::SendSms {
                    number,
                    text: decode_latin1(&data[2 + number_len..]),
                }
            }
            D0_SET_LCD_TEXT => {
                need(data, 3)?;
                OutboundCommand::SetLcdText {
                    line: data[1],
                    column: data[2],
                    text: decode_latin1(&data[3..]),
                }
            }
            D0_FIRMWARE => {
                need(data, 2)?;
                let op = match data[1] {
                    FW_BEGIN => {
                        need(data, 6)?;
                        FirmwareOp::Begin {
                            size: be32(data, 2),
                        }
                    }
                    FW_BLOCK => {
                        need(data, 4)?;
                        FirmwareOp::Block {
                            index: be16(data, 2),
                            data: data[4..].to_vec(),
                        }
                    }
                    FW_COMMIT => {
                        need(data, 6)?;
                        FirmwareOp::Commit {
                            checksum: be32(data, 2),
                        }
                    }
                    FW_ABORT => FirmwareOp::Abort,
                    other => {
                        return Err(CommandError::InvalidField {
                            field: "firmware operation",
                            reason: format!("unknown code {other:#04x}"),
                        });
                    }
                };
                OutboundCommand::Firmware(op)
            }
            D0_REQ_DETAIL => OutboundCommand::RequestDetails,
            other => return Err(CommandError::NotACommand(other)),
        };
        Ok(cmd)
    }
}

/// Wraps a command into a packet from `src` to `target`.
pub fn build_packet(
    src: u16,
    target: Address,
    object: u16,
    command: &OutboundCommand,
) -> Result<Packet> {
    let opcode = if target.is_module() {
        OP_MODULE
    } else {
        OP_OBJECT
    };
    Ok(Packet::new(
        opcode,
        src,
        target.to_wire(),
        object,
        command.encode()?,
    ))
}
