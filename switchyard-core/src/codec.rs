//! Parameter encoders and response decoders.
//!
//! This module provides the [`Encoder`] trait used to turn merged request
//! parameters into a request body, the [`Decoder`] trait used at the final
//! decode step, and the built-in implementations:
//! - [`JsonEncoder`]: `application/json` bodies
//! - [`FormEncoder`]: `application/x-www-form-urlencoded` bodies
//! - [`JsonDecoder`]: JSON response bodies
//!
//! Query strings are produced by [`encode_query`].

use bytes::Bytes;
use serde_json::Value;

/// Error produced by an [`Encoder`] or [`Decoder`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The parameters could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Encodes merged request parameters into a request body.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use serde_json::Value;
/// use switchyard_core::{CodecError, Encoder};
///
/// struct PlainText;
///
/// impl Encoder for PlainText {
///     fn content_type(&self) -> &'static str { "text/plain" }
///
///     fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
///         Ok(Bytes::from(value.to_string()))
///     }
/// }
/// ```
pub trait Encoder: Send + Sync + 'static {
    /// The `Content-Type` header value for bodies produced by this encoder.
    fn content_type(&self) -> &'static str;

    /// Encode parameters into a body.
    fn encode(&self, value: &Value) -> Result<Bytes, CodecError>;
}

/// Decodes a response body into a JSON value.
///
/// Typed decoding goes through `serde_json::from_value` on the result, so a
/// decoder only has to understand the wire format.
pub trait Decoder: Send + Sync + 'static {
    /// Decode a response body.
    fn decode(&self, body: &[u8]) -> Result<Value, CodecError>;
}

/// JSON body encoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(format!("JSON encoding failed: {}", e)))
    }
}

/// URL-encoded form body encoder.
///
/// Nested objects use bracket notation (`user[name]=u`).
#[derive(Clone, Copy, Debug, Default)]
pub struct FormEncoder;

impl Encoder for FormEncoder {
    fn content_type(&self) -> &'static str {
        "application/x-www-form-urlencoded"
    }

    fn encode(&self, value: &Value) -> Result<Bytes, CodecError> {
        encode_query(value).map(Bytes::from)
    }
}

/// Encode parameters as a URL query string (without the leading `?`).
///
/// `null` encodes to the empty string. Non-object top-level values cannot be
/// expressed as key/value pairs and are rejected.
///
/// ```
/// use serde_json::json;
/// use switchyard_core::encode_query;
///
/// let query = encode_query(&json!({"page": 2, "q": "rust"})).unwrap();
/// assert_eq!(query, "page=2&q=rust");
/// ```
pub fn encode_query(value: &Value) -> Result<String, CodecError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Object(_) => serde_qs::to_string(value)
            .map_err(|e| CodecError::Encode(format!("query encoding failed: {}", e))),
        other => Err(CodecError::Encode(format!(
            "query parameters must be an object, got {}",
            value_type_name(other)
        ))),
    }
}

/// JSON response decoder.
///
/// An empty body decodes to `null`, so calls that expect `()` or
/// `Option<T>` succeed against `204 No Content`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(body)
            .map_err(|e| CodecError::Decode(format!("JSON decoding failed: {}", e)))
    }
}

pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_encoder() {
        let body = JsonEncoder
            .encode(&json!({"username": "u", "password": "p"}))
            .unwrap();
        let back: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(back, json!({"username": "u", "password": "p"}));
        assert_eq!(JsonEncoder.content_type(), "application/json");
    }

    #[test]
    fn test_form_encoder_nested() {
        let body = FormEncoder
            .encode(&json!({"user": {"name": "u"}}))
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        // serde_qs percent-encodes the brackets
        assert!(text == "user[name]=u" || text == "user%5Bname%5D=u", "got {text}");
    }

    #[test]
    fn test_encode_query_null_is_empty() {
        assert_eq!(encode_query(&Value::Null).unwrap(), "");
    }

    #[test]
    fn test_encode_query_rejects_array() {
        let err = encode_query(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, CodecError::Encode(msg) if msg.contains("array")));
    }

    #[test]
    fn test_json_decoder_empty_body_is_null() {
        assert_eq!(JsonDecoder.decode(b"").unwrap(), Value::Null);
        assert_eq!(JsonDecoder.decode(b"  \n").unwrap(), Value::Null);
    }

    #[test]
    fn test_json_decoder_invalid() {
        let err = JsonDecoder.decode(b"{not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
