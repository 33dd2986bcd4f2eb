use log::trace;
use serde::Serialize;
use thiserror::Error;

/// opcode + addr_src + addr_dst + obj_src + data_len
pub const HEADER_LEN: usize = 8;
pub const MAX_DATA_LEN: usize = u8::MAX as usize;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },
    #[error("packet declares {declared} data bytes but only {available} bytes follow the header")]
    TruncatedPayload { declared: usize, available: usize },
}

/// The trailing checksum did not match the computed one. The packet is still
/// usable; the gateway tolerates this too.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("packet checksum mismatch: computed {expected:#04x}, received {actual:#04x}")]
pub struct ChecksumMismatch {
    pub expected: u8,
    pub actual: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Packet {
    pub opcode: u8,
    pub addr_src: u16,
    pub addr_dst: u16,
    pub obj_src: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPacket {
    pub packet: Packet,
    pub checksum_mismatch: Option<ChecksumMismatch>,
}

/// Sum of all bytes modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

impl Packet {
    pub fn new(opcode: u8, addr_src: u16, addr_dst: u16, obj_src: u16, data: Vec<u8>) -> Self {
        Self {
            opcode,
            addr_src,
            addr_dst,
            obj_src,
            data,
        }
    }

    /// First data byte, which selects how the rest of the payload is read.
    pub fn sub_opcode(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len() + 1
    }

    /// Serializes the packet. `data` longer than 255 bytes is truncated; the
    /// command builders never produce that.
    pub fn encode(&self) -> Vec<u8> {
        let data = &self.data[..self.data.len().min(MAX_DATA_LEN)];
        let mut out = Vec::with_capacity(HEADER_LEN + data.len() + 1);
        out.push(self.opcode);
        out.extend_from_slice(&self.addr_src.to_le_bytes());
        out.extend_from_slice(&self.addr_dst.to_le_bytes());
        out.extend_from_slice(&self.obj_src.to_le_bytes());
        out.push(data.len() as u8);
        out.extend_from_slice(data);
        out.push(checksum(&out));
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<DecodedPacket, PacketError> {
        if bytes.len() < HEADER_LEN {
            return Err(PacketError::TooShort { len: bytes.len() });
        }

        let data_len = usize::from(bytes[7]);
        let total = HEADER_LEN + data_len + 1;
        if bytes.len() < total {
            return Err(PacketError::TruncatedPayload {
                declared: data_len,
                available: bytes.len() - HEADER_LEN,
            });
        }
        if bytes.len() > total {
            trace!("Ignoring {} bytes after packet checksum", bytes.len() - total);
        }

        let packet = Packet {
            opcode: bytes[0],
            addr_src: u16::from_le_bytes([bytes[1], bytes[2]]),
            addr_dst: u16::from_le_bytes([bytes[3], bytes[4]]),
            obj_src: u16::from_le_bytes([bytes[5], bytes[6]]),
            data: bytes[HEADER_LEN..HEADER_LEN + data_len].to_vec(),
        };

        let expected = checksum(&bytes[..total - 1]);
        let actual = bytes[total - 1];
        let checksum_mismatch =
            (expected != actual).then_some(ChecksumMismatch { expected, actual });

        Ok(DecodedPacket {
            packet,
            checksum_mismatch,
        })
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<op={:#04x} src={} dst={} obj={} [{} bytes]>",
            self.opcode,
            self.addr_src,
            self.addr_dst,
            self.obj_src,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(0x10, 0x0102, 0x8005, 0x0304, vec![0x40, 0x01, 0x00, 0x00, 0xF0])
    }

    #[test]
    fn test_encode_layout() {
        let bytes = sample().encode();
        assert_eq!(
            &bytes[..HEADER_LEN],
            &[0x10, 0x02, 0x01, 0x05, 0x80, 0x04, 0x03, 0x05]
        );
        assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 5], &[0x40, 0x01, 0x00, 0x00, 0xF0]);
        assert_eq!(*bytes.last().unwrap(), checksum(&bytes[..bytes.len() - 1]));
        assert_eq!(bytes.len(), sample().encoded_len());
    }

    #[test]
    fn test_roundtrip() {
        let packets = [
            sample(),
            Packet::new(0xF0, 0, 0, 0, vec![]),
            Packet::new(0x20, u16::MAX, 1, 2, vec![0xAB; 255]),
        ];
        for p in packets {
            let decoded = Packet::decode(&p.encode()).unwrap();
            assert_eq!(decoded.packet, p);
            assert!(decoded.checksum_mismatch.is_none());
        }
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            Packet::decode(&[0x10, 0, 0, 0, 0, 0, 0]),
            Err(PacketError::TooShort { len: 7 })
        );
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = sample().encode();
        bytes.truncate(bytes.len() - 1);
        assert_eq!(
            Packet::decode(&bytes),
            Err(PacketError::TruncatedPayload {
                declared: 5,
                available: 5
            })
        );
    }

    #[test]
    fn test_header_only_without_checksum_is_truncated() {
        assert!(matches!(
            Packet::decode(&[0x01, 0, 0, 0, 0, 0, 0, 0]),
            Err(PacketError::TruncatedPayload { declared: 0, .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch_still_returns_packet() {
        let mut bytes = sample().encode();
        let last = bytes.len() - 1;
        let good = bytes[last];
        bytes[last] = good.wrapping_add(1);

        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.packet, sample());
        assert_eq!(
            decoded.checksum_mismatch,
            Some(ChecksumMismatch {
                expected: good,
                actual: good.wrapping_add(1)
            })
        );
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = sample().encode();
        bytes.extend_from_slice(&[0xEE, 0xEE]);
        assert_eq!(Packet::decode(&bytes).unwrap().packet, sample());
    }
}
