//! HTTP-facing error type and the mapping from service errors.

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::service::FileItemError;

/// Error returned by every handler; rendered as `{"message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    PayloadTooLarge(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Unprocessable(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            message: self.message(),
        });
        (self.status(), body).into_response()
    }
}

impl From<FileItemError> for ApiError {
    fn from(err: FileItemError) -> Self {
        match err {
            FileItemError::InvalidPath { .. } | FileItemError::InvalidInput { .. } => {
                ApiError::Unprocessable(err.to_string())
            }
            FileItemError::NotFound(_) | FileItemError::PhysicalFileMissing { .. } => {
                ApiError::NotFound(err.to_string())
            }
            FileItemError::Io(io_err) => {
                error!(error = %io_err, "storage operation failed");
                ApiError::Internal(format!("storage operation failed ({})", io_err.kind()))
            }
            FileItemError::Store(store_err) => {
                error!(error = %store_err, "unexpected record store failure");
                ApiError::Internal("internal server error".into())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

/// Malformed path parameters, such as an id that is not a UUID.
impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("invalid JSON data: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => {
                format!("invalid JSON syntax: {}", err.body_text())
            }
            JsonRejection::MissingJsonContentType(_) => {
                "expected request with `Content-Type: application/json`".to_string()
            }
            other => other.body_text(),
        };
        ApiError::Unprocessable(message)
    }
}
