//! Decoding terminal task replies into typed results.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::transport::RawResponse;

/// A result type an agent method can produce.
///
/// The shape is decoded with serde from the reply value; `EXPECTED` names it
/// in error messages.
pub trait ResponseShape: DeserializeOwned {
    const EXPECTED: &'static str;
}

impl ResponseShape for Map<String, Value> {
    const EXPECTED: &'static str = "object";
}

impl ResponseShape for String {
    const EXPECTED: &'static str = "string";
}

impl ResponseShape for Value {
    const EXPECTED: &'static str = "any value";
}

/// Why a terminal reply could not become a typed result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
    /// The agent embedded an exception in the reply.
    #[error("agent responded with error: {0}")]
    Exception(String),

    /// The reply value has the wrong shape.
    #[error("expected {expected}, got {actual}")]
    Shape {
        expected: &'static str,
        actual: String,
    },
}

/// Decode `raw` into `S`.
///
/// An embedded exception wins over any payload.
pub fn decode<S: ResponseShape>(raw: &RawResponse) -> Result<S, DecodeFailure> {
    if let Some(exception) = &raw.exception {
        return Err(DecodeFailure::Exception(exception.message.clone()));
    }

    S::deserialize(&raw.value).map_err(|_| DecodeFailure::Shape {
        expected: S::EXPECTED,
        actual: raw.value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exception_overrides_payload() {
        let mut raw = RawResponse::exception("permission denied");
        raw.value = json!({"sha1": "abc"});

        assert_eq!(
            decode::<Map<String, Value>>(&raw),
            Err(DecodeFailure::Exception("permission denied".to_string()))
        );
        assert_eq!(
            decode::<Value>(&raw),
            Err(DecodeFailure::Exception("permission denied".to_string()))
        );
    }

    #[test]
    fn map_is_returned_unchanged() {
        let payload = json!({"sha1": "0123abcd", "blobstore_id": "b-1"});
        let raw = RawResponse::value(payload.clone());

        let map = decode::<Map<String, Value>>(&raw).unwrap();
        assert_eq!(Value::Object(map), payload);
    }

    #[test]
    fn string_shape() {
        let raw = RawResponse::value(json!("synced-version-5"));
        assert_eq!(decode::<String>(&raw).unwrap(), "synced-version-5");
    }

    #[test]
    fn wrong_shape_names_expected_and_actual() {
        let raw = RawResponse::value(json!(42));
        let err = decode::<Map<String, Value>>(&raw).unwrap_err();
        assert_eq!(
            err,
            DecodeFailure::Shape {
                expected: "object",
                actual: "42".to_string()
            }
        );
        assert_eq!(err.to_string(), "expected object, got 42");
    }

    #[test]
    fn null_is_not_a_string() {
        let raw = RawResponse::default();
        assert!(matches!(
            decode::<String>(&raw),
            Err(DecodeFailure::Shape { expected: "string", .. })
        ));
    }
}
