//! Runtime-agnostic protocol core for the field-bus gateway.
//!
//! Everything in here is pure: byte codecs, address forms, the semantic
//! interpreter and the domain types shared with the platform crate. Nothing
//! in this crate touches a socket or a timer.

pub mod address;
pub mod command;
pub mod compress;
pub mod framing;
pub mod hardware;
pub mod hash;
pub mod interpret;
pub mod net;
pub mod packet;
pub mod proto;
pub mod types;

pub use address::{Address, AddressError};
pub use command::{CommandError, FirmwareOp, OutboundCommand};
pub use compress::FrameError;
pub use interpret::{Interpretation, InterpretError, ValueHistory};
pub use packet::{ChecksumMismatch, DecodedPacket, Packet, PacketError};
