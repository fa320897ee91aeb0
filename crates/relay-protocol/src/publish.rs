//! Validation of publish requests.
//!
//! A publish request is checked in a fixed order and the first failure wins:
//! content type, empty body, JSON syntax, then the required message fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::message::{Message, MESSAGE_FIELD, TIMESTAMP_FIELD, TYPE_FIELD};

/// The only media type accepted for publish bodies.
pub const JSON_MEDIA_TYPE: &str = "application/json";

/// Header map as echoed back in errors: lower-cased names to values.
pub type Headers = BTreeMap<String, String>;

/// Reasons a publish request is rejected.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Missing or non-JSON `Content-Type`.
    #[error("Content-Type must be application/json")]
    UnsupportedContentType {
        /// The received `Content-Type`, if any.
        received: Option<String>,
        /// All request headers.
        headers: Headers,
    },

    /// Zero-length body.
    #[error("Request body is empty")]
    EmptyBody,

    /// Body exceeds the configured limit.
    #[error("Request body too large")]
    PayloadTooLarge {
        /// The limit in bytes.
        limit: usize,
    },

    /// Body is not valid JSON.
    #[error("Invalid JSON format")]
    Malformed(#[source] serde_json::Error),

    /// Body is JSON but lacks a non-empty `type` or `message`.
    #[error("Invalid message format. Required fields: type, message")]
    InvalidFormat {
        /// The parsed body.
        received: Value,
    },
}

impl PublishError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedContentType { .. } => "unsupported_content_type",
            Self::EmptyBody => "empty_body",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Malformed(_) => "malformed_payload",
            Self::InvalidFormat { .. } => "invalid_message_format",
        }
    }

    /// The JSON error body returned to the publisher.
    #[must_use]
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        let context = match self {
            Self::UnsupportedContentType { received, headers } => json!({
                "received": received.as_deref().unwrap_or("no content type"),
                "headers": headers,
            }),
            Self::PayloadTooLarge { limit } => json!({ "limit": limit }),
            Self::Malformed(e) => json!({ "details": e.to_string() }),
            Self::InvalidFormat { received } => json!({ "received": received }),
            Self::EmptyBody => return body,
        };

        if let (Some(body), Value::Object(context)) = (body.as_object_mut(), context) {
            body.extend(context);
        }
        body
    }
}

/// Returns `true` if a `Content-Type` value declares JSON.
///
/// Parameters such as `charset` are ignored and the comparison is
/// case-insensitive.
#[must_use]
pub fn is_json_content_type(value: &str) -> bool {
    value
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case(JSON_MEDIA_TYPE))
}

/// Check that the request declares a JSON body.
///
/// # Errors
///
/// Returns [`PublishError::UnsupportedContentType`] echoing the headers.
pub fn check_content_type(headers: &Headers) -> Result<(), PublishError> {
    let content_type = headers.get("content-type");
    if content_type.is_some_and(|ct| is_json_content_type(ct)) {
        return Ok(());
    }
    Err(PublishError::UnsupportedContentType {
        received: content_type.cloned(),
        headers: headers.clone(),
    })
}

/// Validate a publish request and extract its message.
///
/// `headers` must use lower-cased names. Any producer-supplied `timestamp` is
/// discarded; the relay stamps messages itself when broadcasting.
///
/// # Errors
///
/// Returns the first failed check as a [`PublishError`].
pub fn validate(headers: &Headers, body: &[u8]) -> Result<Message, PublishError> {
    check_content_type(headers)?;

    if body.is_empty() {
        return Err(PublishError::EmptyBody);
    }

    let mut value: Value = serde_json::from_slice(body).map_err(PublishError::Malformed)?;

    let Some(object) = value.as_object_mut() else {
        return Err(PublishError::InvalidFormat { received: value });
    };
    if !has_text(object, TYPE_FIELD) || !has_text(object, MESSAGE_FIELD) {
        return Err(PublishError::InvalidFormat { received: value });
    }
    object.remove(TIMESTAMP_FIELD);

    let received = value.clone();
    serde_json::from_value(value).map_err(|_| PublishError::InvalidFormat { received })
}

/// Acknowledgment returned to the publisher after a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishAck {
    /// Always `true`.
    pub success: bool,
    /// Human-readable status.
    pub message: String,
    /// Subscribers in the broadcast snapshot. Diagnostic only.
    pub client_count: usize,
}

impl PublishAck {
    /// Acknowledge a broadcast to `client_count` subscribers.
    #[must_use]
    pub fn new(client_count: usize) -> Self {
        Self {
            success: true,
            message: "Message broadcasted successfully".to_string(),
            client_count,
        }
    }
}

fn has_text(object: &serde_json::Map<String, Value>, field: &str) -> bool {
    object
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_headers() -> Headers {
        let mut headers = Headers::new();
        headers.insert("content-type".into(), "application/json".into());
        headers.insert("accept".into(), "application/json".into());
        headers
    }

    #[test]
    fn test_valid_message() {
        let body = br#"{"type":"info","message":"Hello from Python!"}"#;
        let msg = validate(&json_headers(), body).unwrap();
        assert_eq!(msg, Message::new("info", "Hello from Python!"));
    }

    #[test]
    fn test_producer_timestamp_discarded() {
        let body = br#"{"type":"info","message":"hi","timestamp":"2020-01-01T00:00:00"}"#;
        let msg = validate(&json_headers(), body).unwrap();
        assert!(msg.timestamp.is_none());
        assert!(msg.extra.is_empty());
    }

    #[test]
    fn test_content_type_checked_before_body() {
        let mut headers = json_headers();
        headers.insert("content-type".into(), "text/plain".into());

        let err = validate(&headers, b"").unwrap_err();
        assert_eq!(err.code(), "unsupported_content_type");

        let body = err.to_body();
        assert_eq!(body["received"], "text/plain");
        assert_eq!(body["headers"]["accept"], "application/json");
    }

    #[test]
    fn test_missing_content_type() {
        let err = validate(&Headers::new(), br#"{"type":"a","message":"b"}"#).unwrap_err();
        assert_eq!(err.to_body()["received"], "no content type");
    }

    #[test]
    fn test_content_type_with_charset() {
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(!is_json_content_type("application/jsonp"));
        assert!(!is_json_content_type("text/json"));
    }

    #[test]
    fn test_empty_body() {
        let err = validate(&json_headers(), b"").unwrap_err();
        assert!(matches!(err, PublishError::EmptyBody));
        assert_eq!(err.to_body()["error"], "Request body is empty");
    }

    #[test]
    fn test_malformed_json() {
        let err = validate(&json_headers(), b"{\"type\": ").unwrap_err();
        assert_eq!(err.code(), "malformed_payload");
        assert!(err.to_body()["details"].as_str().is_some());
    }

    #[test]
    fn test_missing_or_empty_fields() {
        let bodies: [&[u8]; 7] = [
            br#"{"message":"no type"}"#,
            br#"{"type":"info"}"#,
            br#"{"type":"","message":"empty type"}"#,
            br#"{"type":"info","message":""}"#,
            br#"{"type":1,"message":"numeric type"}"#,
            br#"["type","message"]"#,
            b"null",
        ];
        for body in bodies {
            let err = validate(&json_headers(), body).unwrap_err();
            assert_eq!(err.code(), "invalid_message_format");
        }
    }

    #[test]
    fn test_publish_ack_shape() {
        assert_eq!(
            serde_json::to_value(PublishAck::new(3)).unwrap(),
            serde_json::json!({
                "success": true,
                "message": "Message broadcasted successfully",
                "clientCount": 3
            })
        );
    }

    #[test]
    fn test_invalid_format_echoes_received() {
        let err = validate(&json_headers(), br#"{"message":"no type"}"#).unwrap_err();
        assert_eq!(
            err.to_body()["received"],
            serde_json::json!({ "message": "no type" })
        );
    }
}
