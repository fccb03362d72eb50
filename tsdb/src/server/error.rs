//! API error responses.
//!
//! Everything the handlers can fail with maps to the JSON error envelope
//! `{"error": {"code": ..., "message": ...}}` with an appropriate status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::{Error, QueryError};

/// An error leaving the HTTP API.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn internal(code: &'static str, message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code,
            message,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::Query(QueryError::WindowInvalid { .. }) => {
                Self::bad_request(err.to_string())
            }
            Error::Query(QueryError::Cancelled) => {
                Self::internal("cancelled", err.to_string())
            }
            Error::Format { .. } => Self::internal("format_error", err.to_string()),
            Error::Io(_) => Self::internal("io_error", err.to_string()),
            _ => Self::internal("internal_error", err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}
