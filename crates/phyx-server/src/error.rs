//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use phyx_core::{ErrorCode, PlanError};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub errno: u16,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Plan(e) => match e.code() {
                ErrorCode::MalformedPlan | ErrorCode::InvalidConfig => StatusCode::BAD_REQUEST,
                ErrorCode::Timeout => StatusCode::REQUEST_TIMEOUT,
                // client went away or a kill flag was raised
                ErrorCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn body(&self) -> ErrorBody {
        let code = match self {
            ApiError::Plan(e) => e.code(),
            ApiError::BadRequest(_) => ErrorCode::MalformedPlan,
        };
        ErrorBody {
            code: code.as_str().to_string(),
            errno: code.errno(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(%status, "request failed: {}", self);
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_per_code() {
        let cases = [
            (PlanError::malformed("x"), StatusCode::BAD_REQUEST),
            (PlanError::InvalidConfig("x".into()), StatusCode::BAD_REQUEST),
            (PlanError::Timeout(10), StatusCode::REQUEST_TIMEOUT),
            (PlanError::Cancelled, StatusCode::SERVICE_UNAVAILABLE),
            (PlanError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_body_carries_errno() {
        let body = ApiError::from(PlanError::Timeout(250)).body();
        assert_eq!(body.code, "timeout");
        assert_eq!(body.errno, 3024);
        assert!(body.message.contains("250 ms"));
    }
}
