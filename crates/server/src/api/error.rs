//! Error-to-response mapping.

use crate::parse::ParseError;
use crate::session::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// The error taxonomy of the HTTP surface.
///
/// `Forbidden` carries no cause on purpose: a wrong token and an unknown
/// session produce byte-identical responses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden,
    NotFound(String),
    Upstream,
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => ApiError::BadRequest(message),
            StoreError::Forbidden => ApiError::Forbidden,
            StoreError::SessionNotFound(_) => ApiError::NotFound("Session not found".to_string()),
            StoreError::ThreadNotFound(_) => ApiError::NotFound("Thread not found".to_string()),
            StoreError::MessageNotFound(_) => ApiError::NotFound("Message not found".to_string()),
            StoreError::Database(message)
            | StoreError::Serialization(message)
            | StoreError::Other(message) => ApiError::Internal(message),
        }
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::Unsupported(message) => ApiError::BadRequest(message),
            ParseError::UpstreamExtraction => ApiError::Upstream,
            ParseError::Database(message) | ParseError::Other(message) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Upstream => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process document".to_string(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_indistinguishable_across_causes() {
        let from_missing_session: ApiError = StoreError::Forbidden.into();
        let from_wrong_token: ApiError = StoreError::Forbidden.into();
        let a = from_missing_session.into_response();
        let b = from_wrong_token.into_response();
        assert_eq!(a.status(), StatusCode::FORBIDDEN);
        assert_eq!(b.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn upstream_failure_hides_detail() {
        let err: ApiError = ParseError::UpstreamExtraction.into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_maps_to_bad_request() {
        let err: ApiError = StoreError::Validation("too big".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
