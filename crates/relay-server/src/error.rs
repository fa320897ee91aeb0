//! HTTP error responses.

use crate::metrics;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_protocol::{ProtocolError, PublishError};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Errors returned by the relay endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The publish request was rejected.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// The request body could not be read.
    #[error("Failed to read request body")]
    BodyRead(String),

    /// The subscriber limit has been reached.
    #[error("Too many subscribers")]
    TooManySubscribers {
        /// Configured limit.
        limit: usize,
    },

    /// A validated message could not be framed.
    #[error("Failed to encode message")]
    Encode(#[from] ProtocolError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Publish(PublishError::PayloadTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Publish(_) | Self::BodyRead(_) => StatusCode::BAD_REQUEST,
            Self::TooManySubscribers { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Publish(e) => e.code(),
            Self::BodyRead(_) => "body_read_failed",
            Self::TooManySubscribers { .. } => "too_many_subscribers",
            Self::Encode(_) => "encode_failed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::record_rejection(self.code());

        let body = match &self {
            Self::Publish(e) => {
                warn!(code = e.code(), error = %e, "Publish rejected");
                e.to_body()
            }
            Self::BodyRead(details) => {
                warn!(details = %details, "Failed to read publish body");
                json!({ "error": self.to_string(), "code": self.code(), "details": details })
            }
            Self::TooManySubscribers { limit } => {
                warn!(limit = limit, "Subscriber limit reached");
                json!({ "error": self.to_string(), "code": self.code(), "limit": limit })
            }
            Self::Encode(e) => {
                error!(error = %e, "Failed to encode message");
                json!({ "error": self.to_string(), "code": self.code() })
            }
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(PublishError::EmptyBody).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(PublishError::PayloadTooLarge { limit: 8 }).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::TooManySubscribers { limit: 1 }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_publish_error_code_passes_through() {
        assert_eq!(ApiError::from(PublishError::EmptyBody).code(), "empty_body");
    }
}
