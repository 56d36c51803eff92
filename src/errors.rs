use crate::services::error::{ErrorKind, UploadError, ValidationError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// HTTP-facing error: a status, a message, and the machine-readable kind when known.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub kind: Option<ErrorKind>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            kind: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg).with_kind(ErrorKind::InvalidRequest)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16(),
            "kind": self.kind,
        }));

        (self.status, body).into_response()
    }
}

/// Status code an orchestrator failure is reported with.
pub fn status_for(err: &UploadError) -> StatusCode {
    match err {
        UploadError::Validation(ValidationError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::Validation(
            ValidationError::UnsupportedType { .. } | ValidationError::TypeMismatch { .. },
        ) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        UploadError::Validation(ValidationError::EmptyFile) => StatusCode::BAD_REQUEST,
        UploadError::NotFound(_) => StatusCode::NOT_FOUND,
        UploadError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        UploadError::BackendRejected(_) => StatusCode::BAD_GATEWAY,
        UploadError::UnknownProvider(_)
        | UploadError::ProviderNotConfigured(_)
        | UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        UploadError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        UploadError::PartialBatchFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        UploadError::Registry(_) | UploadError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        AppError::new(status, err.to_string()).with_kind(err.kind())
    }
}
