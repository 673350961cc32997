use sha3::{Digest, Keccak256};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// `0x`-prefixed lowercase hex Keccak-256 digest.
pub fn keccak_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(keccak256(data)))
}

/// True for a `0x`-prefixed 32-byte hex digest (66 characters).
pub fn is_digest_hex(s: &str) -> bool {
    s.len() == 66
        && s.starts_with("0x")
        && s.as_bytes()[2..].iter().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            keccak_hex(b""),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn digest_shape() {
        assert!(is_digest_hex(&keccak_hex(b"hello")));
        assert!(!is_digest_hex("0x1234"));
        assert!(!is_digest_hex(&format!("0x{}", "zz".repeat(32))));
        assert!(!is_digest_hex(&"ab".repeat(33)));
    }
}
