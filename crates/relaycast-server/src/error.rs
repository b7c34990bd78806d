//! HTTP error taxonomy.
//!
//! Maps core errors onto the response statuses the relay exposes: unknown
//! channel 404, missing credential 401, mismatched credential 403, malformed
//! input 422.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use relaycast_core::RegistryError;

/// API errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown channel id.
    #[error("channel not found: {0}")]
    NotFound(String),

    /// No credential was presented.
    #[error("missing api key")]
    Unauthorized,

    /// The presented credential does not match.
    #[error("invalid api key")]
    Forbidden,

    /// Request body failed validation.
    #[error("{0}")]
    UnprocessableEntity(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(id),
            RegistryError::Forbidden => ApiError::Forbidden,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotFound("ch_1".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::UnprocessableEntity("bad".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_registry_error_conversion() {
        let err: ApiError = RegistryError::Forbidden.into();
        assert!(matches!(err, ApiError::Forbidden));

        let err: ApiError = RegistryError::NotFound("ch_1".into()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
