//! Derivation of store identifiers from cache keys

use crate::types::Identifier;
use sha2::{Digest, Sha256};

/// Generate the store identifier for a URL.
///
/// Only 32 bits of the digest are kept, so distinct URLs can share an
/// identifier; the store treats such keys as the same object.
pub fn identifier(url: &str) -> Identifier {
    let digest = Sha256::digest(url.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_is_stable() {
        let a = identifier("https://www.example.org/index.html");
        let b = identifier("https://www.example.org/index.html");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identifier_differs_for_different_urls() {
        let a = identifier("https://www.example.org/a.png");
        let b = identifier("https://www.example.org/b.png");
        assert_ne!(a, b);
    }

    #[test]
    fn test_identifier_uses_digest_prefix() {
        // sha256("") = e3b0c442...
        assert_eq!(identifier(""), 0x42c4_b0e3);
    }
}
