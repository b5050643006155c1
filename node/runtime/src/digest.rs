use sha3::{Digest, Keccak256};

/// Keccak-256 over the concatenation of the given byte slices.
///
/// Policy identifiers (HRAC, map ids) and node fingerprints are all
/// derived through this single digest.
pub fn keccak256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_concatenation_is_flat() {
        // digest(a ++ b) == digest over parts [a, b]
        let joined = keccak256(&[b"hello world"]);
        let split = keccak256(&[b"hello ", b"world"]);
        assert_eq!(joined, split);
    }

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("") is the well-known empty digest
        let empty = keccak256(&[]);
        assert_eq!(
            hex::encode(empty),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }
}
