//! JSON attribute-bag and `sqlite-vec` vector (de)serialization.
//!
//! Attribute bags are stored as a `TEXT` column holding JSON, but some rows
//! end up double-encoded (a JSON string containing JSON) depending on how
//! they were written, so decoding tries to parse the inner string and
//! falls back to the raw value. `sqlite-vec` accepts and returns vectors as
//! a plain JSON array of floats over its `vec_f32`/`vec_to_json` functions.

use crate::error::PhantomError;

/// Encode an attribute bag (traits, voice, tags, metadata) for storage in a
/// `TEXT` column.
pub fn encode_json(value: &serde_json::Value) -> String {
    value.to_string()
}

/// Decode a `TEXT` column back into an attribute bag, tolerating
/// double-encoded JSON (a JSON string whose content is itself JSON) written
/// by older callers or other tooling.
pub fn decode_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
    row_id: &str,
) -> Result<serde_json::Value, PhantomError> {
    if raw.is_empty() {
        return Ok(serde_json::Value::Null);
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::String(inner)) => {
            Ok(serde_json::from_str(&inner).unwrap_or(serde_json::Value::String(inner)))
        }
        Ok(value) => Ok(value),
        Err(err) => Err(PhantomError::CorruptRecord {
            table,
            column,
            row_id: row_id.to_string(),
            message: err.to_string(),
        }),
    }
}

/// Encode an embedding vector as the JSON-array text `vec_f32()` expects.
pub fn encode_vector(embedding: &[f32]) -> Result<String, PhantomError> {
    serde_json::to_string(embedding)
        .map_err(|err| PhantomError::StorageError(format!("failed to encode vector: {err}")))
}

/// Decode the JSON-array text `vec_to_json()` returns back into a vector.
pub fn decode_vector(raw: &str) -> Result<Vec<f32>, PhantomError> {
    serde_json::from_str(raw)
        .map_err(|err| PhantomError::StorageError(format!("failed to decode vector: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trips_plain_object() {
        let value = serde_json::json!({"cautious": true, "loyalty": 7});
        let encoded = encode_json(&value);
        let decoded = decode_json(&encoded, "characters", "traits", "aria").unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_tolerates_double_encoding() {
        let inner = serde_json::json!({"a": 1});
        let double_encoded = serde_json::to_string(&inner.to_string()).unwrap();
        let decoded = decode_json(&double_encoded, "characters", "traits", "aria").unwrap();
        assert_eq!(decoded, inner);
    }

    #[test]
    fn json_empty_string_is_null() {
        let decoded = decode_json("", "characters", "traits", "aria").unwrap();
        assert_eq!(decoded, serde_json::Value::Null);
    }

    #[test]
    fn json_decode_failure_is_corrupt_record() {
        let err = decode_json("{not valid json", "characters", "traits", "aria").unwrap_err();
        assert_eq!(err.kind(), "CorruptRecord");
    }

    #[test]
    fn vector_round_trips() {
        let embedding = vec![0.1_f32, 0.2, 0.3];
        let encoded = encode_vector(&embedding).unwrap();
        let decoded = decode_vector(&encoded).unwrap();
        assert_eq!(decoded, embedding);
    }
}
