//! Stable content hashes for structured values.
//!
//! Object and array values cannot be stored literally in the index
//! containers, so deep-equality matching (`sub_doc_equals`, `array_equals`,
//! structured `array_contains` entries) compares SHA-256 digests of the
//! canonical serialized form instead.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex length of a content hash: 16 bytes of the digest.
const HASH_HEX_LEN: usize = 32;

/// Digest of the canonical (compact, key order preserving) form of a value.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let canonical = super::canonical_json(value);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(HASH_HEX_LEN);
    hash
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn equal_values_hash_equal() {
        assert_eq!(content_hash(&json!({"a": 1, "b": [2]})), content_hash(&json!({"a": 1, "b": [2]})));
    }

    #[test]
    fn key_order_is_significant() {
        // Canonical form preserves insertion order, so reordering keys is a
        // different sub-document.
        assert_ne!(content_hash(&json!({"a": 1, "b": 2})), content_hash(&json!({"b": 2, "a": 1})));
    }

    #[test]
    fn hash_is_fixed_width_hex() {
        let hash = content_hash(&json!([1, 2, 3]));
        assert_eq!(hash.len(), 32);
        assert!(hash.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}
