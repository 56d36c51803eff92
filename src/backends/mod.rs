//! Storage backend abstraction.
//!
//! Every provider implements the same capability set (`store`, `delete`,
//! `resolve_url`, `list`) so the orchestrator never touches the filesystem or
//! the network directly. Backends are selected per operation from a
//! `BackendSet` that is built once at startup and never mutated.

pub mod local;
pub mod managed_media;
pub mod s3;

use crate::models::{BackendKind, FileObject};
use crate::services::error::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{collections::HashMap, future::Future, io, sync::Arc, time::Duration};
use thiserror::Error;

pub use self::local::LocalBackend;
pub use self::managed_media::{HttpMediaApi, ManagedMediaBackend, MediaApi};
pub use self::s3::{ObjectStoreBackend, ObjectStoreSettings, S3UrlSigner, UrlSigner};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Transient: network, I/O, timeout. Safe to retry with a new key.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Permanent for this request: quota, permission, conflicting key.
    #[error("backend rejected request: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
            | io::ErrorKind::StorageFull
            | io::ErrorKind::QuotaExceeded
            | io::ErrorKind::AlreadyExists
            | io::ErrorKind::InvalidInput => BackendError::Rejected(err.to_string()),
            _ => BackendError::Unavailable(err.to_string()),
        }
    }
}

/// Bytes to persist for a pending FileObject.
pub struct StoreRequest<'a> {
    pub object: &'a FileObject,
    pub data: Bytes,
    pub generate_derivative: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    /// Backend-native address (path, object key, or media public id).
    pub location: String,
    /// Predictable URL of a derivative whose generation was requested.
    pub derivative_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlOptions {
    /// Lifetime of signed URLs. Ignored for stable public paths.
    pub expires_in: Duration,
    pub force_download: bool,
}

/// One raw object as reported by a backend listing.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendEntry {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Persist the payload under the object's `stored_key`.
    async fn store(&self, request: StoreRequest<'_>) -> BackendResult<StoredObject>;

    /// Remove the object. Deleting a missing object succeeds.
    async fn delete(&self, object: &FileObject) -> BackendResult<()>;

    /// Public path for public objects, signed URL for private ones.
    async fn resolve_url(&self, object: &FileObject, options: &UrlOptions) -> BackendResult<String>;

    /// Raw keys under `prefix`, for reconciliation and operator listings.
    async fn list(&self, prefix: Option<&str>) -> BackendResult<Vec<BackendEntry>>;
}

/// Run a backend call under a deadline. Expiry is reported as a transient failure.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Unavailable(format!(
            "{} timed out after {}ms",
            operation,
            limit.as_millis()
        ))),
    }
}

/// Read-only mapping from provider kind to backend, plus the configured default.
#[derive(Clone)]
pub struct BackendSet {
    backends: HashMap<BackendKind, Arc<dyn StorageBackend>>,
    default: BackendKind,
}

impl BackendSet {
    pub fn new(default: BackendKind) -> Self {
        Self {
            backends: HashMap::new(),
            default,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn default_kind(&self) -> BackendKind {
        self.default
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.backends.contains_key(k))
            .collect()
    }

    /// Fails when the default provider was never registered.
    pub fn ensure_default(&self) -> Result<(), UploadError> {
        self.get(self.default).map(|_| ())
    }

    pub fn get(&self, kind: BackendKind) -> Result<Arc<dyn StorageBackend>, UploadError> {
        self.backends
            .get(&kind)
            .cloned()
            .ok_or(UploadError::ProviderNotConfigured(kind))
    }

    /// Resolve an explicit provider name, falling back to the default.
    pub fn select(&self, provider: Option<&str>) -> Result<Arc<dyn StorageBackend>, UploadError> {
        let kind = parse_provider(provider)?.unwrap_or(self.default);
        self.get(kind)
    }
}

/// Parse an optional provider name; blank values count as absent.
pub fn parse_provider(provider: Option<&str>) -> Result<Option<BackendKind>, UploadError> {
    match provider.map(str::trim).filter(|p| !p.is_empty()) {
        None => Ok(None),
        Some(name) => name
            .parse::<BackendKind>()
            .map(Some)
            .map_err(|_| UploadError::UnknownProvider(name.to_string())),
    }
}
