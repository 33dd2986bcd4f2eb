//! Wire constants shared by the codecs and the interpreter.

/// Keepalive telegram, empty payload, sent in both directions.
pub const OP_KEEPALIVE: u8 = 0x01;
/// Telegram addressed to an object or a group.
pub const OP_OBJECT: u8 = 0x10;
/// Telegram addressed to a whole module (detail read / detail ack).
pub const OP_MODULE: u8 = 0x20;
/// Authentication request and the gateway's answer.
pub const OP_HANDSHAKE: u8 = 0xF0;

pub const D0_SET: u8 = 0x01;
pub const D0_INC: u8 = 0x02;
pub const D0_DEC: u8 = 0x03;
pub const D0_TOGGLE: u8 = 0x04;
pub const D0_DIM: u8 = 0x05;
pub const D0_LOCK: u8 = 0x06;
pub const D0_REQ_VALUE: u8 = 0x07;
pub const D0_ENABLE_CONFIG: u8 = 0x08;
pub const D0_PLAY_TRACK: u8 = 0x09;
pub const D0_SEND_SMS: u8 = 0x0A;
pub const D0_SET_LCD_TEXT: u8 = 0x0B;
pub const D0_FIRMWARE: u8 = 0x0C;
pub const D0_REQ_DETAIL: u8 = 0x0D;

pub const D0_VALUE_ACK: u8 = 0x40;
pub const D0_ACK: u8 = 0x41;
pub const D0_STATUS: u8 = 0x42;
pub const D0_DETAIL_ACK: u8 = 0x43;

pub const D0_AUTH_GRANTED: u8 = 0xF1;
pub const D0_AUTH_DENIED: u8 = 0xF2;

pub const IN_HW_IS_TEMP: u8 = 0x01;
pub const IN_HW_IS_HUMIDITY: u8 = 0x02;
pub const IN_HW_IS_PRESSURE: u8 = 0x03;
pub const IN_HW_IS_LIGHT: u8 = 0x04;
pub const IN_HW_IS_RAIN: u8 = 0x05;
pub const IN_HW_IS_WIND: u8 = 0x06;
pub const IN_HW_IS_VOLUME: u8 = 0x07;
pub const IN_HW_IS_CLOCK: u8 = 0x08;
pub const IN_HW_IS_ACCESS: u8 = 0x09;
pub const IN_HW_IS_LEVEL: u8 = 0x0A;
pub const IN_HW_IS_BINARY: u8 = 0x0B;
pub const IN_HW_IS_COVER: u8 = 0x0C;
pub const IN_HW_IS_CO2: u8 = 0x0D;

/// Bit 0 of the value-ack flags byte selects the alternate scale.
pub const VALUE_FLAG_SCALED: u8 = 0x01;

pub const FW_BEGIN: u8 = 0x01;
pub const FW_BLOCK: u8 = 0x02;
pub const FW_COMMIT: u8 = 0x03;
pub const FW_ABORT: u8 = 0x04;
