//! UploadOrchestrator: validate, key, store, commit, resolve.
//!
//! Every failure after `store` is attempted rolls back before the error is
//! returned: the registry row (if any) is discarded and the backend object is
//! deleted. Batches run each file through the same pipeline on a bounded
//! worker pool and report per-file outcomes in input order.

use crate::backends::{parse_provider, with_timeout, BackendEntry, BackendSet, StorageBackend, StoreRequest};
use crate::models::{
    BatchReport, DeleteOutcome, FileObject, FileOutcome, FileState, FileSummary, IncomingFile,
    ListQuery, ListScope, PurgeReport, ResolveOptions, UploadOptions, UploadReceipt,
};
use crate::services::{
    error::{UploadError, UploadResult},
    keys::{sanitize_folder, FilenameGenerator},
    registry::{MetadataRegistry, RegistryError},
    resolver::UrlResolver,
    validator::FileValidator,
};
use chrono::Utc;
use std::{sync::Arc, time::{Duration, Instant}};
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MAX_WORKER_POOL_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub worker_pool_size: usize,
    pub max_batch_files: usize,
    pub backend_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            max_batch_files: 10,
            backend_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct UploadOrchestrator {
    validator: Arc<FileValidator>,
    keys: FilenameGenerator,
    backends: BackendSet,
    registry: Arc<dyn MetadataRegistry>,
    resolver: UrlResolver,
    settings: OrchestratorSettings,
    workers: Arc<Semaphore>,
}

/// Tracks what a single upload has done so far, so a failure can undo it.
struct UploadSaga {
    object: FileObject,
    backend: Arc<dyn StorageBackend>,
    registry: Arc<dyn MetadataRegistry>,
    timeout: Duration,
    store_attempted: bool,
    recorded: bool,
}

impl UploadSaga {
    fn new(
        object: FileObject,
        backend: Arc<dyn StorageBackend>,
        registry: Arc<dyn MetadataRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            object,
            backend,
            registry,
            timeout,
            store_attempted: false,
            recorded: false,
        }
    }

    /// The object as it reads once committed.
    fn committed(&self) -> FileObject {
        FileObject {
            state: FileState::Stored,
            ..self.object.clone()
        }
    }

    /// Undo every completed step and hand back `reason`.
    ///
    /// A timed-out or cancelled `store` may still have written bytes, so the
    /// backend delete runs whenever a store was attempted.
    async fn roll_back(self, reason: UploadError) -> UploadError {
        let key = &self.object.stored_key;
        warn!(id = %self.object.id, key = %key, error = %reason, "rolling back upload");

        if self.recorded {
            if let Err(err) = self.registry.discard(self.object.id).await {
                error!(id = %self.object.id, error = %err, "failed to discard registry record");
            }
        }
        if self.store_attempted {
            let deleted = with_timeout(self.timeout, "delete", self.backend.delete(&self.object)).await;
            if let Err(err) = deleted {
                error!(key = %key, provider = %self.object.backend, error = %err, "compensating delete failed");
            }
        }
        reason
    }
}

impl UploadOrchestrator {
    pub fn new(
        validator: FileValidator,
        backends: BackendSet,
        registry: Arc<dyn MetadataRegistry>,
        resolver: UrlResolver,
        mut settings: OrchestratorSettings,
    ) -> Self {
        settings.worker_pool_size = settings.worker_pool_size.clamp(1, MAX_WORKER_POOL_SIZE);
        settings.max_batch_files = settings.max_batch_files.max(1);
        let workers = Arc::new(Semaphore::new(settings.worker_pool_size));

        Self {
            validator: Arc::new(validator),
            keys: FilenameGenerator::new(),
            backends,
            registry,
            resolver,
            settings,
            workers,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn validator(&self) -> &FileValidator {
        &self.validator
    }

    pub fn backends(&self) -> &BackendSet {
        &self.backends
    }

    /// Upload one file. On any error no backend object or registry record remains.
    pub async fn upload(
        &self,
        file: IncomingFile,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> UploadResult<UploadReceipt> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let backend = self.backends.select(options.provider.as_deref())?;
        let size_bytes = file.data.len() as u64;
        let validated = self
            .validator
            .validate(&file.file_name, file.mime_type.as_deref(), size_bytes)?;

        let owner_id = options.owner_id.trim();
        if owner_id.is_empty() {
            return Err(UploadError::InvalidRequest("owner_id is required".to_string()));
        }

        let stored_key = self.keys.generate(&file.file_name);
        let folder = options
            .folder
            .as_deref()
            .and_then(sanitize_folder)
            .or_else(|| sanitize_folder(&format!("users/{}", owner_id)));

        let mut metadata = options.metadata.clone();
        metadata.insert("originalName".to_string(), file.file_name.clone());
        metadata.insert("uploadedBy".to_string(), owner_id.to_string());
        metadata.insert("etag".to_string(), format!("{:x}", md5::compute(&file.data)));

        let object = FileObject {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            project_id: options.project_id.clone().filter(|p| !p.trim().is_empty()),
            original_name: file.file_name.clone(),
            stored_key,
            folder,
            size_bytes,
            mime_type: validated.mime_type,
            category: validated.category,
            backend: backend.kind(),
            visibility: options.visibility.unwrap_or_default(),
            created_at: Utc::now(),
            metadata,
            state: FileState::Pending,
        };

        let start = Instant::now();
        let mut saga = UploadSaga::new(
            object,
            backend.clone(),
            self.registry.clone(),
            self.settings.backend_timeout,
        );

        saga.store_attempted = true;
        let stored = {
            let request = StoreRequest {
                object: &saga.object,
                data: file.data,
                generate_derivative: options.generate_derivative,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                result = with_timeout(self.settings.backend_timeout, "store", backend.store(request)) => {
                    result.map_err(UploadError::from)
                }
            }
        };
        let stored = match stored {
            Ok(stored) => stored,
            Err(err) => return Err(saga.roll_back(err).await),
        };

        if cancel.is_cancelled() {
            return Err(saga.roll_back(UploadError::Cancelled).await);
        }

        if let Err(err) = self.registry.create(&saga.object).await {
            return Err(saga.roll_back(err.into()).await);
        }
        saga.recorded = true;

        let committed = saga.committed();
        let url = match self.resolver.resolve(&committed, &ResolveOptions::default()).await {
            Ok(url) => url,
            Err(err) => return Err(saga.roll_back(err).await),
        };

        info!(
            id = %committed.id,
            key = %committed.stored_key,
            provider = %committed.backend,
            category = %committed.category,
            size_bytes,
            location = %stored.location,
            duration_ms = start.elapsed().as_millis() as u64,
            "upload stored"
        );

        Ok(UploadReceipt {
            id: committed.id,
            url,
            size_bytes,
            mime_type: committed.mime_type,
            provider: committed.backend,
            category: committed.category,
            derivative_url: stored.derivative_url,
        })
    }

    /// Upload files independently on the worker pool. One file failing never
    /// affects its siblings; outcomes come back in input order.
    pub async fn upload_batch(
        &self,
        files: Vec<IncomingFile>,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> UploadResult<BatchReport> {
        if files.is_empty() {
            return Err(UploadError::InvalidRequest("batch contains no files".to_string()));
        }
        if files.len() > self.settings.max_batch_files {
            return Err(UploadError::InvalidRequest(format!(
                "batch of {} files exceeds the limit of {}",
                files.len(),
                self.settings.max_batch_files
            )));
        }

        let total = files.len();
        let start = Instant::now();
        let names: Vec<(String, Option<String>)> = files
            .iter()
            .map(|f| (f.file_name.clone(), f.client_ref.clone()))
            .collect();
        let options = Arc::new(options.clone());
        let mut tasks = JoinSet::new();

        for (index, file) in files.into_iter().enumerate() {
            let this = self.clone();
            let options = options.clone();
            let cancel = cancel.clone();
            let workers = self.workers.clone();

            tasks.spawn(async move {
                let file_name = file.file_name.clone();
                let client_ref = file.client_ref.clone();
                let result = match workers.acquire_owned().await {
                    Ok(permit) => {
                        let result = this.upload(file, &options, &cancel).await;
                        drop(permit);
                        result
                    }
                    Err(_) => Err(UploadError::Internal("worker pool closed".to_string())),
                };
                FileOutcome {
                    index,
                    file_name,
                    client_ref,
                    result,
                }
            });
        }

        let mut slots: Vec<Option<FileOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    let index = outcome.index;
                    slots[index] = Some(outcome);
                }
                Err(err) => error!(error = %err, "batch upload task failed"),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(names)
            .enumerate()
            .map(|(index, (slot, (file_name, client_ref)))| {
                slot.unwrap_or_else(|| FileOutcome {
                    index,
                    file_name,
                    client_ref,
                    result: Err(UploadError::Internal("upload task aborted".to_string())),
                })
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch upload complete"
        );
        Ok(report)
    }

    pub async fn get(&self, id: Uuid) -> UploadResult<FileObject> {
        Ok(self.registry.get(id).await?)
    }

    pub async fn resolve_url(&self, id: Uuid, options: &ResolveOptions) -> UploadResult<String> {
        let object = self.registry.get(id).await?;
        self.resolver.resolve(&object, options).await
    }

    /// Two-phase delete: tombstone, remove from the backend, then purge.
    ///
    /// A backend failure leaves the record tombstoned for
    /// [`purge_tombstoned`](Self::purge_tombstoned) and returns the error.
    pub async fn delete(&self, id: Uuid, provider: Option<&str>) -> UploadResult<DeleteOutcome> {
        let requested = parse_provider(provider)?;
        let object = match self.registry.get(id).await {
            Ok(object) => object,
            Err(RegistryError::NotFound(_)) => return Ok(DeleteOutcome::NotFound),
            Err(err) => return Err(err.into()),
        };
        if requested.is_some_and(|kind| kind != object.backend) {
            return Ok(DeleteOutcome::NotFound);
        }

        match object.state {
            FileState::Purged => return Ok(DeleteOutcome::Purged),
            FileState::Pending | FileState::Failed => return Ok(DeleteOutcome::NotFound),
            FileState::Stored | FileState::Tombstoned => {}
        }

        let object = self.registry.tombstone(id).await?;
        self.purge(&object).await?;
        Ok(DeleteOutcome::Purged)
    }

    async fn purge(&self, object: &FileObject) -> UploadResult<()> {
        let backend = self.backends.get(object.backend)?;
        let start = Instant::now();

        match with_timeout(self.settings.backend_timeout, "delete", backend.delete(object)).await {
            Ok(()) => {
                self.registry.delete(object.id).await?;
                info!(
                    id = %object.id,
                    key = %object.stored_key,
                    provider = %object.backend,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "file purged"
                );
                Ok(())
            }
            Err(err) => {
                warn!(
                    id = %object.id,
                    key = %object.stored_key,
                    provider = %object.backend,
                    error = %err,
                    "backend delete failed; record left tombstoned"
                );
                Err(err.into())
            }
        }
    }

    /// Retry backend deletion for tombstoned records.
    pub async fn purge_tombstoned(&self, limit: usize) -> UploadResult<PurgeReport> {
        let pending = self.registry.list_tombstoned(limit).await?;
        let mut report = PurgeReport {
            attempted: pending.len(),
            ..Default::default()
        };

        for object in &pending {
            match self.purge(object).await {
                Ok(()) => report.purged += 1,
                Err(_) => report.still_tombstoned += 1,
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                purged = report.purged,
                still_tombstoned = report.still_tombstoned,
                "tombstone reconciliation pass"
            );
        }
        Ok(report)
    }

    pub async fn list(&self, query: &ListQuery) -> UploadResult<Vec<FileSummary>> {
        let scope_id = match &query.scope {
            ListScope::Owner(id) | ListScope::Project(id) => id,
        };
        if scope_id.trim().is_empty() {
            return Err(UploadError::InvalidRequest(
                "owner_id or project_id is required".to_string(),
            ));
        }

        let objects = self.registry.list(query).await?;
        debug!(count = objects.len(), "listed files");
        Ok(objects.iter().map(FileSummary::from).collect())
    }

    /// Raw keys on one backend, for operators and reconciliation.
    pub async fn list_backend(
        &self,
        provider: Option<&str>,
        prefix: Option<&str>,
    ) -> UploadResult<Vec<BackendEntry>> {
        let backend = self.backends.select(provider)?;
        let entries = with_timeout(self.settings.backend_timeout, "list", backend.list(prefix)).await?;
        Ok(entries)
    }
}
