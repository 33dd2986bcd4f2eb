//! Password transform used by the gateway handshake.

/// XOR mask the gateway applies on top of the digest.
const SERVER_HASH_MASK: u8 = 0xAA;

/// 128-bit MD5 digest of `data`.
pub fn digest(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Authentication payload for `password`: the digest of its UTF-8 bytes with
/// every byte XORed with `0xAA`. Must stay bit-exact with the gateway.
pub fn server_hash(password: &str) -> [u8; 16] {
    let mut hash = digest(password.as_bytes());
    for b in hash.iter_mut() {
        *b ^= SERVER_HASH_MASK;
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_reference_vectors() {
        assert_eq!(hex::encode(digest(b"")), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hex::encode(digest(b"abc")), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(
            hex::encode(digest(b"The quick brown fox jumps over the lazy dog")),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
    }

    #[test]
    fn test_digest_crosses_block_boundary() {
        // 56 bytes forces the length into a second padding block.
        let input = [b'a'; 56];
        assert_eq!(hex::encode(digest(&input)), "3b0c8ac703f828b04c6c197006d17218");
    }

    #[test]
    fn test_server_hash_masks_every_byte() {
        let plain = digest(b"secret");
        let masked = server_hash("secret");
        for (p, m) in plain.iter().zip(masked.iter()) {
            assert_eq!(p ^ 0xAA, *m);
        }
    }

    #[test]
    fn test_server_hash_empty_password() {
        assert_eq!(hex::encode(server_hash("")), "7eb7267325aa18ae432aa3324652e8d4");
    }
}
