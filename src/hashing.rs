//! Hashing - SHA-256 over Canonical JSON
//!
//! Gives every transform list a stable content hash for caching and audit.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

use crate::transform::TransformSpec;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Content hash of a transform list, as requested by the caller.
pub fn compute_pipeline_hash(transforms: &[TransformSpec]) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(&transforms)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":{"a":2,"b":1},"z":1}"#);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pipeline_hash_tracks_content() {
        let a = vec![TransformSpec::new("Rotate").with_param("limit", 30)];
        let b = vec![TransformSpec::new("Rotate").with_param("limit", 45)];
        assert_eq!(
            compute_pipeline_hash(&a).unwrap(),
            compute_pipeline_hash(&a).unwrap()
        );
        assert_ne!(
            compute_pipeline_hash(&a).unwrap(),
            compute_pipeline_hash(&b).unwrap()
        );
    }
}
