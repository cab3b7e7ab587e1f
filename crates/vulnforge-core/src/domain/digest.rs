//! Canonical JSON normalization and digest computation (RFC 8785-class).
//!
//! This module implements RFC 8785-compliant canonical JSON serialization with:
//! - UTF-16 code unit ordering for object keys (§3.2.3)
//! - Number normalization (integer-valued floats → integers; reject NaN/Infinity)
//! - SHA256 hex digest computation
//!
//! Used by [`crate::sid::derive_sid`] and by the Synthesis Engine for
//! candidate-manifest digests.

use crate::domain::error::{Result, VulnforgeError};
use sha2::{Digest, Sha256};

/// Recursively sort JSON object keys using UTF-16 code unit ordering (RFC 8785 §3.2.3).
fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<_> = map.keys().collect();

            keys.sort_by(|a, b| {
                let a_utf16: Vec<u16> = a.encode_utf16().collect();
                let b_utf16: Vec<u16> = b.encode_utf16().collect();
                a_utf16.cmp(&b_utf16)
            });

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

/// Normalize numbers: integer-valued floats → integer repr; reject NaN/Infinity.
fn normalize_value(value: &serde_json::Value) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map.iter() {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => {
            let normalized = arr
                .iter()
                .map(normalize_value)
                .collect::<Result<Vec<_>>>()?;
            Ok(serde_json::Value::Array(normalized))
        }
        serde_json::Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(serde_json::Value::Number(n.clone()))
            } else if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(VulnforgeError::SchemaError {
                        context: "canonical_json".to_string(),
                        reason: "NaN/Infinity not permitted in canonical JSON".to_string(),
                    });
                }
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Ok(serde_json::Value::Number(serde_json::Number::from(
                        f as i64,
                    )))
                } else {
                    Ok(serde_json::Value::Number(n.clone()))
                }
            } else {
                Ok(serde_json::Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Convert JSON value to canonical form: normalize numbers → sort keys → compact JSON.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    let normalized = normalize_value(value)?;
    let sorted = sort_keys_utf16(&normalized);
    Ok(serde_json::to_string(&sorted)?)
}

/// Compute SHA256 hex digest of canonical JSON.
pub fn compute_digest(value: &serde_json::Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_is_deterministic_under_utf16_key_order() {
        let input = serde_json::json!({
            "b": 1,
            "a": 2,
            "α": 3
        });
        let canonical = canonical_json(&input).expect("canonical_json");
        let canonical2 = canonical_json(&input).expect("canonical_json");
        assert_eq!(canonical, canonical2);
    }

    #[test]
    fn integer_valued_float_normalizes_to_integer() {
        let input = serde_json::json!({ "value": 1.0 });
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":1}"#);
    }

    #[test]
    fn fractional_float_is_preserved() {
        let input = serde_json::json!({ "value": 1.5 });
        assert_eq!(canonical_json(&input).unwrap(), r#"{"value":1.5}"#);
    }

    #[test]
    fn field_order_does_not_affect_canonical_form() {
        let input1 = serde_json::json!({"a": 1, "b": 2, "c": 3});
        let input2 = serde_json::json!({"c": 3, "a": 1, "b": 2});
        assert_eq!(
            canonical_json(&input1).unwrap(),
            canonical_json(&input2).unwrap()
        );
    }

    #[test]
    fn array_order_is_preserved_not_sorted() {
        let input1 = serde_json::json!({"array": [3, 1, 2]});
        let input2 = serde_json::json!({"array": [1, 2, 3]});
        assert_ne!(
            canonical_json(&input1).unwrap(),
            canonical_json(&input2).unwrap()
        );
    }

    #[test]
    fn compute_digest_is_64_char_hex_and_stable() {
        let input = serde_json::json!({"name": "test", "version": "1.0.0"});
        let digest = compute_digest(&input).unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c: char| c.is_ascii_hexdigit()));
        assert_eq!(digest, compute_digest(&input).unwrap());
    }
}
