//! Gateway "compression" container.
//!
//! The gateway wraps every packet in a container that it calls compressed,
//! but the payload is carried verbatim: only framing is added.
//!
//! ```text
//! prefix_len:u8  0 0 0  payload_len:be16  payload  0xC0  checksum:be32
//! ```

use log::warn;
use thiserror::Error;

/// Bytes in front of the length field: the prefix byte itself plus padding.
pub const CONTAINER_PREFIX_LEN: usize = 4;
pub const END_MARKER: u8 = 0xC0;

const MIN_CONTAINER_LEN: usize = 7;
const LENGTH_FIELD_LEN: usize = 2;
const TRAILER_LEN: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("container too short: {0} bytes")]
    TooShort(usize),
    #[error("container has no payload length field")]
    MissingLength,
    #[error("container has no room for end marker and checksum")]
    MissingTrailer,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Sum of all bytes modulo 2^32.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter()
        .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

/// Wraps `data` into a container. Never fails and never shrinks the data.
pub fn compress(data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= u16::MAX as usize, "payload exceeds container length field");

    let mut out =
        Vec::with_capacity(CONTAINER_PREFIX_LEN + LENGTH_FIELD_LEN + data.len() + TRAILER_LEN);
    out.push(CONTAINER_PREFIX_LEN as u8);
    out.extend_from_slice(&[0, 0, 0]);
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out.push(END_MARKER);
    out.extend_from_slice(&checksum(data).to_be_bytes());
    out
}

/// Extracts the payload from a container.
///
/// Only structural problems are errors. A length field, end marker or checksum
/// that does not agree with the data is logged and the data is returned anyway,
/// which is what the gateway itself does.
pub fn decompress(container: &[u8]) -> Result<Vec<u8>> {
    if container.len() < MIN_CONTAINER_LEN {
        return Err(FrameError::TooShort(container.len()));
    }

    let prefix_len = usize::from(container[0]).max(CONTAINER_PREFIX_LEN);
    let block = container.get(prefix_len..).unwrap_or_default();
    if block.len() < LENGTH_FIELD_LEN {
        return Err(FrameError::MissingLength);
    }

    let data_len = block
        .len()
        .checked_sub(LENGTH_FIELD_LEN + TRAILER_LEN)
        .ok_or(FrameError::MissingTrailer)?;

    let declared = usize::from(u16::from_be_bytes([block[0], block[1]]));
    let data = &block[LENGTH_FIELD_LEN..LENGTH_FIELD_LEN + data_len];
    let trailer = &block[LENGTH_FIELD_LEN + data_len..];

    if declared != data_len {
        warn!(target: "Frame", "Container length field says {declared} bytes, found {data_len}");
    }
    if trailer[0] != END_MARKER {
        warn!(target: "Frame", "Container end marker is {:#04x}, expected {END_MARKER:#04x}", trailer[0]);
    }
    let expected = u32::from_be_bytes([trailer[1], trailer[2], trailer[3], trailer[4]]);
    let actual = checksum(data);
    if expected != actual {
        warn!(target: "Frame", "Container checksum mismatch: declared {expected:#010x}, computed {actual:#010x}");
    }

    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_layout() {
        let out = compress(&[0x10, 0x20, 0x30]);
        assert_eq!(
            out,
            vec![4, 0, 0, 0, 0x00, 0x03, 0x10, 0x20, 0x30, 0xC0, 0x00, 0x00, 0x00, 0x60]
        );
    }

    #[test]
    fn test_roundtrip_preserves_data() {
        let samples: [&[u8]; 4] = [b"", b"\x00", b"hello gateway", &[0xFF; 300]];
        for data in samples {
            assert_eq!(decompress(&compress(data)).unwrap(), data);
        }
    }

    #[test]
    fn test_checksum_wraps_modulo_u32() {
        assert_eq!(checksum(&[0xFF; 4]), 0x3FC);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_wrong_checksum_is_tolerated() {
        let frame = [4, 0, 0, 0, 0, 0, 0xC0, 0, 0, 0, 1];
        assert_eq!(decompress(&frame).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_length_mismatch_is_tolerated() {
        let mut frame = compress(b"abc");
        frame[5] = 9;
        assert_eq!(decompress(&frame).unwrap(), b"abc");
    }

    #[test]
    fn test_too_short() {
        assert_eq!(decompress(&[4, 0, 0, 0, 0, 0]), Err(FrameError::TooShort(6)));
    }

    #[test]
    fn test_missing_length_field() {
        // Declared prefix runs past the buffer.
        assert_eq!(
            decompress(&[40, 0, 0, 0, 0, 0, 0xC0, 0]),
            Err(FrameError::MissingLength)
        );
    }

    #[test]
    fn test_missing_trailer() {
        assert_eq!(
            decompress(&[4, 0, 0, 0, 0, 0, 0xC0, 0, 0]),
            Err(FrameError::MissingTrailer)
        );
    }

    #[test]
    fn test_small_prefix_len_is_treated_as_minimum() {
        let mut frame = compress(b"xy");
        frame[0] = 1;
        assert_eq!(decompress(&frame).unwrap(), b"xy");
    }
}
