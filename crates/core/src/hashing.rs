//! SHA-256 hex digests (environment tokens are stored hashed).

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn distinct_tokens_hash_differently() {
        assert_ne!(sha256_hex(b"env-token-a"), sha256_hex(b"env-token-b"));
        assert_eq!(sha256_hex(b"env-token-a").len(), 64);
    }
}
