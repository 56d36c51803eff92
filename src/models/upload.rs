//! Inputs and results of the upload, resolve, delete, and list operations.

use super::file_object::{BackendKind, Category, FileObject, Visibility};
use crate::services::error::{BatchFailure, UploadError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A file received from the caller but not yet validated or persisted.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
    /// Caller-supplied correlation id echoed back in batch outcomes.
    pub client_ref: Option<String>,
}

impl IncomingFile {
    pub fn new(file_name: impl Into<String>, mime_type: Option<&str>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.map(str::to_string),
            data: data.into(),
            client_ref: None,
        }
    }

    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }
}

/// Options shared by single and batch uploads.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub owner_id: String,
    pub project_id: Option<String>,
    pub folder: Option<String>,
    pub visibility: Option<Visibility>,
    pub generate_derivative: bool,
    pub provider: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl UploadOptions {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            ..Default::default()
        }
    }
}

/// Successful upload result.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub id: Uuid,
    pub url: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub provider: BackendKind,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivative_url: Option<String>,
}

/// Per-file result of a batch upload, matched to its input by `index`.
#[derive(Debug)]
pub struct FileOutcome {
    pub index: usize,
    pub file_name: String,
    pub client_ref: Option<String>,
    pub result: Result<UploadReceipt, UploadError>,
}

/// Aggregate batch result in input order. Callers must inspect every outcome.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn failures(&self) -> Vec<BatchFailure> {
        self.outcomes
            .iter()
            .filter_map(|o| {
                o.result.as_ref().err().map(|err| BatchFailure {
                    index: o.index,
                    file_name: o.file_name.clone(),
                    kind: err.kind(),
                    message: err.to_string(),
                })
            })
            .collect()
    }

    /// Collapse into all-or-nothing signalling for callers that need it.
    pub fn into_result(self) -> Result<Vec<UploadReceipt>, UploadError> {
        let failures = self.failures();
        if !failures.is_empty() {
            return Err(UploadError::PartialBatchFailure {
                total: self.outcomes.len(),
                failed: failures.len(),
                failures,
            });
        }
        Ok(self
            .outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub provider: Option<String>,
    pub force_download: bool,
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Purged,
    NotFound,
}

/// Which registry partition a listing covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    Owner(String),
    Project(String),
}

#[derive(Debug, Clone)]
pub struct ListQuery {
    pub scope: ListScope,
    /// Matched against `folder/stored_key`.
    pub prefix: Option<String>,
    pub provider: Option<BackendKind>,
}

/// Listing row for stored files.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub id: Uuid,
    pub original_name: String,
    pub stored_key: String,
    pub folder: Option<String>,
    pub size_bytes: u64,
    pub mime_type: String,
    pub category: Category,
    pub provider: BackendKind,
    pub visibility: Visibility,
    pub project_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&FileObject> for FileSummary {
    fn from(object: &FileObject) -> Self {
        Self {
            id: object.id,
            original_name: object.original_name.clone(),
            stored_key: object.stored_key.clone(),
            folder: object.folder.clone(),
            size_bytes: object.size_bytes,
            mime_type: object.mime_type.clone(),
            category: object.category,
            provider: object.backend,
            visibility: object.visibility,
            project_id: object.project_id.clone(),
            created_at: object.created_at,
        }
    }
}

/// Result of one tombstone reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub attempted: usize,
    pub purged: usize,
    pub still_tombstoned: usize,
}
