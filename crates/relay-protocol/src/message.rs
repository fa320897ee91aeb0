//! The broadcast message.
//!
//! A message is what a producer publishes and what every subscriber receives.
//! Only `type` and `message` are interpreted by the relay; everything else is
//! carried through untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field name of the message kind.
pub const TYPE_FIELD: &str = "type";

/// Field name of the human-readable message text.
pub const MESSAGE_FIELD: &str = "message";

/// Field name of the relay-assigned timestamp.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A message broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind, e.g. `info` or `warning`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Message text.
    pub message: String,

    /// Optional structured payload.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,

    /// ISO-8601 timestamp assigned by the relay when the message is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Any other top-level fields sent by the producer.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keeps an explicit `null` as `Some(Value::Null)` so it survives a round trip.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Message {
    /// Create a new message without payload or timestamp.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the timestamp from the given instant.
    #[must_use]
    pub fn stamped_at(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at.to_rfc3339_opts(SecondsFormat::Millis, true));
        self
    }

    /// Set the timestamp to the current time.
    #[must_use]
    pub fn stamped(self) -> Self {
        self.stamped_at(Utc::now())
    }
}
