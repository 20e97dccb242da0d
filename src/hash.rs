//! Content hashing for the CAS (spec.md §3 `Blob`). Uses `blake3`, the
//! teacher's own hashing crate (`crdt/Cargo.toml`), hex-encoded for use as a
//! path component.

/// Hex-encoded blake3 hash of `bytes`.
pub fn hash_content(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_hash() {
        assert_eq!(hash_content(b"X"), hash_content(b"X"));
    }

    #[test]
    fn different_content_different_hash() {
        assert_ne!(hash_content(b"X"), hash_content(b"Y"));
    }

    #[test]
    fn hash_is_lowercase_hex_64_chars() {
        let h = hash_content(b"hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
