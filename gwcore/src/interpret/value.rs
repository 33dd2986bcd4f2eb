//! Value acknowledgements: `[D0_VALUE_ACK, in_hw, flags, payload...]`.
//!
//! The input-hardware byte selects the physical quantity and its scaling.

use super::{InterpretError, ValueHistory};
use crate::address::Address;
use crate::proto::*;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InputHardware {
    Temperature,
    Humidity,
    Pressure,
    Illuminance,
    Rain,
    WindSpeed,
    Volume,
    Clock,
    AccessTag,
    Level,
    Binary,
    CoverPosition,
    Co2,
    Other(u8),
}

impl From<u8> for InputHardware {
    fn from(code: u8) -> Self {
        match code {
            IN_HW_IS_TEMP => InputHardware::Temperature,
            IN_HW_IS_HUMIDITY => InputHardware::Humidity,
            IN_HW_IS_PRESSURE => InputHardware::Pressure,
            IN_HW_IS_LIGHT => InputHardware::Illuminance,
            IN_HW_IS_RAIN => InputHardware::Rain,
            IN_HW_IS_WIND => InputHardware::WindSpeed,
            IN_HW_IS_VOLUME => InputHardware::Volume,
            IN_HW_IS_CLOCK => InputHardware::Clock,
            IN_HW_IS_ACCESS => InputHardware::AccessTag,
            IN_HW_IS_LEVEL => InputHardware::Level,
            IN_HW_IS_BINARY => InputHardware::Binary,
            IN_HW_IS_COVER => InputHardware::CoverPosition,
            IN_HW_IS_CO2 => InputHardware::Co2,
            other => InputHardware::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
    Illuminance,
    Rain,
    WindSpeed,
    Volume,
    Co2,
}

impl Quantity {
    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "°C",
            Quantity::Humidity => "%",
            Quantity::Pressure => "hPa",
            Quantity::Illuminance => "lx",
            Quantity::Rain => "mm",
            Quantity::WindSpeed => "km/h",
            Quantity::Volume => "l",
            Quantity::Co2 => "ppm",
        }
    }

    fn decimals(self) -> usize {
        match self {
            Quantity::Temperature
            | Quantity::Humidity
            | Quantity::Pressure
            | Quantity::Rain
            | Quantity::WindSpeed => 1,
            Quantity::Illuminance | Quantity::Volume | Quantity::Co2 => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClockFlags {
    pub sync_phase: bool,
    pub holiday: bool,
    pub no_reception: bool,
    pub dst: bool,
    pub dst_announcement: bool,
}

impl ClockFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            sync_phase: bits & 0x01 != 0,
            holiday: bits & 0x02 != 0,
            no_reception: bits & 0x04 != 0,
            dst: bits & 0x08 != 0,
            dst_announcement: bits & 0x10 != 0,
        }
    }

    fn labels(&self) -> Vec<&'static str> {
        [
            (self.sync_phase, "sync phase"),
            (self.holiday, "holiday"),
            (self.no_reception, "no reception"),
            (self.dst, "DST"),
            (self.dst_announcement, "DST change announced"),
        ]
        .into_iter()
        .filter_map(|(set, label)| set.then_some(label))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClockReading {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub flags: ClockFlags,
}

impl ClockReading {
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?
        .and_hms_opt(
            u32::from(self.hour),
            u32::from(self.minute),
            u32::from(self.second),
        )
    }
}

impl fmt::Display for ClockReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        let labels = self.flags.labels();
        if !labels.is_empty() {
            write!(f, " ({})", labels.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TagPresence {
    Detected,
    Held,
    HeldLong,
    RemovedAfterShort,
}

impl TagPresence {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => TagPresence::Held,
            2 => TagPresence::HeldLong,
            3 => TagPresence::RemovedAfterShort,
            _ => TagPresence::Detected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TagRead {
    pub tag: [u8; 5],
    pub presence: TagPresence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Reading {
    Quantity { kind: Quantity, value: f64 },
    Clock(ClockReading),
    AccessTag(TagRead),
    Level(u8),
    Binary(bool),
    CoverPosition(u8),
    /// Unknown input hardware: raw value plus the change since the previous
    /// reading of the same device object.
    Generic {
        hardware: u8,
        value: u16,
        delta: Option<i32>,
    },
}

impl Reading {
    pub fn quantity(kind: Quantity, value: f64) -> Self {
        Reading::Quantity { kind, value }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Quantity { kind, value } => {
                write!(f, "{value:.prec$} {}", kind.unit(), prec = kind.decimals())
            }
            Reading::Clock(clock) => fmt::Display::fmt(clock, f),
            Reading::AccessTag(read) => {
                let state = match read.presence {
                    TagPresence::Detected => "detected",
                    TagPresence::Held => "held",
                    TagPresence::HeldLong => "held long",
                    TagPresence::RemovedAfterShort => "removed after short hold",
                };
                write!(f, "tag {} {state}", hex::encode_upper(read.tag))
            }
            Reading::Level(level) => write!(f, "{level} %"),
            Reading::Binary(on) => f.write_str(if *on { "on" } else { "off" }),
            Reading::CoverPosition(open) => write!(f, "{open} % open"),
            Reading::Generic { value, delta, .. } => match delta {
                Some(d) => write!(f, "{value} ({d:+})"),
                None => write!(f, "{value}"),
            },
        }
    }
}

fn bcd(byte: u8, field: &'static str) -> Result<u8, InterpretError> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    if hi > 9 || lo > 9 {
        return Err(InterpretError::InvalidField {
            field,
            reason: format!("{byte:#04x} is not BCD"),
        });
    }
    Ok(hi * 10 + lo)
}

fn require(data: &[u8], needed: usize) -> Result<(), InterpretError> {
    if data.len() < needed {
        return Err(InterpretError::Truncated {
            sub_opcode: D0_VALUE_ACK,
            needed,
            got: data.len(),
        });
    }
    Ok(())
}

fn decode_clock(data: &[u8]) -> Result<ClockReading, InterpretError> {
    require(data, 9)?;
    Ok(ClockReading {
        flags: ClockFlags::from_bits(data[2]),
        second: bcd(data[3], "second")?,
        minute: bcd(data[4], "minute")?,
        hour: bcd(data[5], "hour")?,
        day: bcd(data[6], "day")?,
        month: bcd(data[7], "month")?,
        year: 2000 + u16::from(bcd(data[8], "year")?),
    })
}

fn decode_tag(data: &[u8]) -> Result<TagRead, InterpretError> {
    require(data, 8)?;
    let mut tag = [0u8; 5];
    tag.copy_from_slice(&data[3..8]);
    Ok(TagRead {
        tag,
        presence: TagPresence::from_bits(data[2]),
    })
}

fn percent(raw: u16, field: &'static str) -> Result<u8, InterpretError> {
    if raw > 100 {
        return Err(InterpretError::InvalidField {
            field,
            reason: format!("{raw} is not a percentage"),
        });
    }
    Ok(raw as u8)
}

/// Decodes a value acknowledgement payload (sub-opcode included).
pub fn decode_value_ack(
    source: Address,
    object: u16,
    data: &[u8],
    history: &mut ValueHistory,
) -> Result<Reading, InterpretError> {
    require(data, 2)?;
    let hardware = InputHardware::from(data[1]);

    let reading = match hardware {
        InputHardware::Clock => Reading::Clock(decode_clock(data)?),
        InputHardware::AccessTag => Reading::AccessTag(decode_tag(data)?),
        _ => decode_scalar(hardware, source, object, data, history)?,
    };
    Ok(reading)
}

fn decode_scalar(
    hardware: InputHardware,
    source: Address,
    object: u16,
    data: &[u8],
    history: &mut ValueHistory,
) -> Result<Reading, InterpretError> {
    require(data, 5)?;
    let scaled = data[2] & VALUE_FLAG_SCALED != 0;
    let raw = u16::from_be_bytes([data[3], data[4]]);

    let reading = match hardware {
        InputHardware::Temperature => {
            let tenths = i32::from(raw as i16) * 10 / 16;
            Reading::quantity(Quantity::Temperature, f64::from(tenths) / 10.0)
        }
        InputHardware::Humidity => Reading::quantity(Quantity::Humidity, f64::from(raw) / 10.0),
        InputHardware::Pressure => {
            let hpa = if scaled {
                f64::from(raw) / 10.0
            } else {
                f64::from(raw)
            };
            Reading::quantity(Quantity::Pressure, hpa)
        }
        InputHardware::Illuminance => {
            let lux = if scaled {
                f64::from(raw) * 10.0
            } else {
                f64::from(raw)
            };
            Reading::quantity(Quantity::Illuminance, lux)
        }
        InputHardware::Rain => Reading::quantity(Quantity::Rain, f64::from(raw) / 10.0),
        InputHardware::WindSpeed => {
            let speed = if scaled {
                f64::from(raw) / 8.0
            } else {
                f64::from(raw)
            };
            Reading::quantity(Quantity::WindSpeed, speed)
        }
        InputHardware::Volume => {
            let litres = if scaled {
                f64::from(raw) * 10.0
            } else {
                f64::from(raw)
            };
            Reading::quantity(Quantity::Volume, litres)
        }
        InputHardware::Co2 => Reading::quantity(Quantity::Co2, f64::from(raw)),
        InputHardware::Level => Reading::Level(percent(raw, "level")?),
        InputHardware::CoverPosition => Reading::CoverPosition(percent(raw, "cover position")?),
        InputHardware::Binary => Reading::Binary(raw != 0),
        InputHardware::Other(code) => Reading::Generic {
            hardware: code,
            value: raw,
            delta: history.record(source, object, raw),
        },
        InputHardware::Clock | InputHardware::AccessTag => {
            return Err(InterpretError::InvalidField {
                field: "input hardware",
                reason: format!("{hardware:?} carries no scalar value"),
            });
        }
    };
    Ok(reading)
}
