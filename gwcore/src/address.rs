//! The three address forms used on the bus and their text representations.
//!
//! * object address: plain decimal, `42`
//! * group address: `G` + decimal, bit 15 set on the wire, `G7`
//! * module identifier: `MD` + four hex digits, numerically `0x10000 + hex`, `MD1A2B`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const GROUP_FLAG: u16 = 0x8000;
pub const GROUP_MARKER: char = 'G';
pub const MODULE_PREFIX: &str = "MD";
pub const MODULE_BASE: u32 = 0x1_0000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address: {0:?}")]
    Invalid(String),
    #[error("object address {0} collides with the group flag")]
    ObjectOutOfRange(u32),
}

/// Parses the lenient text form of a bus address.
///
/// A leading group marker sets bit 15. Leading non-digit characters are
/// dropped; whatever is left must be a decimal number or the result is 0.
pub fn parse_address(text: &str) -> u16 {
    let text = text.trim();
    let is_group = text
        .chars()
        .next()
        .is_some_and(|c| c.eq_ignore_ascii_case(&GROUP_MARKER));
    let digits = text.trim_start_matches(|c: char| !c.is_ascii_digit());
    let value = digits.parse::<u16>().unwrap_or(0);

    if is_group {
        GROUP_FLAG | (value & !GROUP_FLAG)
    } else {
        value
    }
}

pub fn format_address(addr: u16) -> String {
    if addr & GROUP_FLAG != 0 {
        format!("{GROUP_MARKER}{}", addr & !GROUP_FLAG)
    } else {
        addr.to_string()
    }
}

/// `MD` followed by exactly four hex digits.
pub fn parse_module_id(text: &str) -> Option<u32> {
    let text = text.trim();
    let prefix = text.get(..MODULE_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(MODULE_PREFIX) {
        return None;
    }
    let hex = &text[MODULE_PREFIX.len()..];
    if hex.len() != 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().map(|v| MODULE_BASE + v)
}

pub fn format_module_id(raw: u32) -> Option<String> {
    (MODULE_BASE..MODULE_BASE + 0x1_0000)
        .contains(&raw)
        .then(|| format!("{MODULE_PREFIX}{:04X}", raw - MODULE_BASE))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Address {
    /// 15-bit object address.
    Object(u16),
    /// 15-bit group number, sent with bit 15 set.
    Group(u16),
    /// Module identifier, sent on `OP_MODULE` telegrams.
    Module(u16),
}

impl Address {
    /// Interprets an address field from an object/group telegram.
    pub fn from_wire(addr: u16) -> Self {
        if addr & GROUP_FLAG != 0 {
            Address::Group(addr & !GROUP_FLAG)
        } else {
            Address::Object(addr)
        }
    }

    /// Value written into a packet address field.
    pub fn to_wire(self) -> u16 {
        match self {
            Address::Object(v) => v & !GROUP_FLAG,
            Address::Group(v) => GROUP_FLAG | (v & !GROUP_FLAG),
            Address::Module(v) => v,
        }
    }

    /// Single numeric namespace: modules live at `0x10000 + id`.
    pub fn to_raw(self) -> u32 {
        match self {
            Address::Module(v) => MODULE_BASE + u32::from(v),
            other => u32::from(other.to_wire()),
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        if raw >= MODULE_BASE {
            Address::Module((raw - MODULE_BASE) as u16)
        } else {
            Address::from_wire(raw as u16)
        }
    }

    pub fn is_module(&self) -> bool {
        matches!(self, Address::Module(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Address::Group(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Module(v) => write!(f, "{MODULE_PREFIX}{v:04X}"),
            other => f.write_str(&format_address(other.to_wire())),
        }
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(raw) = parse_module_id(s) {
            return Ok(Address::from_raw(raw));
        }

        let (is_group, digits) = match s.chars().next() {
            Some(c) if c.eq_ignore_ascii_case(&GROUP_MARKER) => (true, &s[1..]),
            _ => (false, s),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(AddressError::Invalid(s.to_string()));
        }
        let value: u32 = digits
            .parse()
            .map_err(|_| AddressError::Invalid(s.to_string()))?;
        if value > u32::from(!GROUP_FLAG) {
            return Err(AddressError::ObjectOutOfRange(value));
        }

        Ok(if is_group {
            Address::Group(value as u16)
        } else {
            Address::Object(value as u16)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_and_group() {
        assert_eq!(parse_address("42"), 42);
        assert_eq!(parse_address("G7"), 0x8007);
        assert_eq!(parse_address("g7"), 0x8007);
        assert_eq!(parse_address("obj 12"), 12);
    }

    #[test]
    fn test_parse_defaults_to_zero() {
        assert_eq!(parse_address(""), 0);
        assert_eq!(parse_address("abc"), 0);
        assert_eq!(parse_address("12x"), 0);
        assert_eq!(parse_address("G"), 0x8000);
    }

    #[test]
    fn test_format() {
        assert_eq!(format_address(42), "42");
        assert_eq!(format_address(0x8007), "G7");
        assert_eq!(format_address(0xFFFF), "G32767");
    }

    #[test]
    fn test_roundtrip_every_address() {
        for a in 0..=u16::MAX {
            assert_eq!(parse_address(&format_address(a)), a, "address {a:#06x}");
        }
    }

    #[test]
    fn test_module_id_forms() {
        assert_eq!(parse_module_id("MD1A2B"), Some(0x11A2B));
        assert_eq!(parse_module_id("md00ff"), Some(0x100FF));
        assert_eq!(parse_module_id("MD1A2"), None);
        assert_eq!(parse_module_id("XX1A2B"), None);
        assert_eq!(parse_module_id("MD1G2B"), None);
        assert_eq!(format_module_id(0x11A2B).as_deref(), Some("MD1A2B"));
        assert_eq!(format_module_id(0xFFFF), None);
        assert_eq!(format_module_id(0x20000), None);
        for raw in [0x10000, 0x10001, 0x1BEEF, 0x1FFFF] {
            assert_eq!(parse_module_id(&format_module_id(raw).unwrap()), Some(raw));
        }
    }

    #[test]
    fn test_typed_address_text_roundtrip() {
        for addr in [
            Address::Object(0),
            Address::Object(0x7FFF),
            Address::Group(3),
            Address::Module(0x1A2B),
        ] {
            assert_eq!(addr.to_string().parse::<Address>().unwrap(), addr);
        }
    }

    #[test]
    fn test_typed_address_rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        assert!("G".parse::<Address>().is_err());
        assert!("12a".parse::<Address>().is_err());
        assert_eq!(
            "40000".parse::<Address>(),
            Err(AddressError::ObjectOutOfRange(40000))
        );
    }

    #[test]
    fn test_wire_and_raw_forms() {
        assert_eq!(Address::from_wire(0x8003), Address::Group(3));
        assert_eq!(Address::Group(3).to_wire(), 0x8003);
        assert_eq!(Address::Module(0x1A2B).to_raw(), 0x11A2B);
        assert_eq!(Address::from_raw(0x11A2B), Address::Module(0x1A2B));
        assert_eq!(Address::from_raw(0x8001), Address::Group(1));
    }
}
