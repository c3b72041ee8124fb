//! Digests used by the orchestration core.
//!
//! Two very different hashes live here:
//! - `blueprint_digest`: SHA256 hex of the canonical JSON form of a blueprint.
//!   Identical blueprints always yield the same digest, whatever their key order.
//! - `checksum`: FNV-1a 64-bit hex of artifact content. Non-cryptographic, only
//!   used to detect changed files between two builds.

use sha2::{Digest, Sha256};

use crate::domain::error::Result;

/// Recursively sort JSON object keys using UTF-16 code unit ordering.
fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys_utf16).collect())
        }
        other => other.clone(),
    }
}

/// Convert a JSON value to canonical form: sorted keys, compact output.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    Ok(serde_json::to_string(&sort_keys_utf16(value))?)
}

/// SHA256 hex digest of any serializable value's canonical JSON.
pub fn blueprint_digest<T: serde::Serialize>(value: &T) -> Result<String> {
    let canonical = canonical_json(&serde_json::to_value(value)?)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit checksum of `content`, as 16 lowercase hex chars.
pub fn checksum(content: &str) -> String {
    let hash = content.bytes().fold(FNV_OFFSET_BASIS, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    });
    hex::encode(hash.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_field_order_invariant() {
        let a = json!({ "b": 1, "a": { "z": 1, "y": 2 } });
        let b = json!({ "a": { "y": 2, "z": 1 }, "b": 1 });
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn canonical_json_array_order_preserved() {
        let a = json!({ "array": [3, 1, 2] });
        let b = json!({ "array": [1, 2, 3] });
        assert_ne!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn blueprint_digest_is_sha256_hex() {
        let digest = blueprint_digest(&json!({ "name": "demo" })).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn checksum_matches_fnv1a_reference_vectors() {
        assert_eq!(checksum(""), "cbf29ce484222325");
        assert_eq!(checksum("a"), "af63dc4c8601ec8c");
    }

    #[test]
    fn checksum_detects_changes() {
        assert_ne!(checksum("CREATE TABLE a"), checksum("CREATE TABLE b"));
    }
}
