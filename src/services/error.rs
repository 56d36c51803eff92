//! Typed failure reasons returned by the validator, the orchestrator, and the
//! operations built on them.

use crate::backends::BackendError;
use crate::models::{BackendKind, Category};
use crate::services::registry::RegistryError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Client-fixable rejection. Produced before any backend or registry access.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file is empty")]
    EmptyFile,

    #[error("unsupported file type `{mime}` ({extension})")]
    UnsupportedType { mime: String, extension: String },

    #[error("mime type `{mime}` ({mime_category}) does not match extension `.{extension}` ({extension_category})")]
    TypeMismatch {
        mime: String,
        extension: String,
        mime_category: Category,
        extension_category: Category,
    },

    #[error("{category} file of {size_bytes} bytes exceeds the {max_bytes} byte limit")]
    TooLarge {
        category: Category,
        size_bytes: u64,
        max_bytes: u64,
    },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Machine-readable error kind, shared by HTTP bodies and batch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyFile,
    UnsupportedType,
    TypeMismatch,
    TooLarge,
    BackendUnavailable,
    BackendRejected,
    NotFound,
    UnknownProvider,
    InvalidRequest,
    Cancelled,
    Registry,
    PartialBatchFailure,
    Internal,
}

/// One failed file inside a batch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BatchFailure {
    pub index: usize,
    pub file_name: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transient; the caller may retry, which allocates a fresh key.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Not retried automatically (quota, permission, conflicting key).
    #[error("storage backend rejected the request: {0}")]
    BackendRejected(String),

    #[error("file `{0}` not found")]
    NotFound(Uuid),

    #[error("unknown storage provider `{0}`")]
    UnknownProvider(String),

    #[error("storage provider `{0}` is not configured")]
    ProviderNotConfigured(BackendKind),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("metadata registry error: {0}")]
    Registry(RegistryError),

    #[error("{failed} of {total} files failed")]
    PartialBatchFailure {
        total: usize,
        failed: usize,
        failures: Vec<BatchFailure>,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type UploadResult<T> = Result<T, UploadError>;

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Validation(ValidationError::EmptyFile) => ErrorKind::EmptyFile,
            UploadError::Validation(ValidationError::UnsupportedType { .. }) => {
                ErrorKind::UnsupportedType
            }
            UploadError::Validation(ValidationError::TypeMismatch { .. }) => ErrorKind::TypeMismatch,
            UploadError::Validation(ValidationError::TooLarge { .. }) => ErrorKind::TooLarge,
            UploadError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            UploadError::BackendRejected(_) => ErrorKind::BackendRejected,
            UploadError::NotFound(_) => ErrorKind::NotFound,
            UploadError::UnknownProvider(_) | UploadError::ProviderNotConfigured(_) => {
                ErrorKind::UnknownProvider
            }
            UploadError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            UploadError::Cancelled => ErrorKind::Cancelled,
            UploadError::Registry(_) => ErrorKind::Registry,
            UploadError::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            UploadError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::BackendUnavailable(_))
    }
}

impl From<BackendError> for UploadError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(msg) => UploadError::BackendUnavailable(msg),
            BackendError::Rejected(msg) => UploadError::BackendRejected(msg),
        }
    }
}

impl From<RegistryError> for UploadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => UploadError::NotFound(id),
            other => UploadError::Registry(other),
        }
    }
}
