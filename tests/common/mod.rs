#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use object_store::memory::InMemory;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::TempDir;
use upload_vault::{
    backends::{
        BackendEntry, BackendError, BackendResult, BackendSet, LocalBackend, ObjectStoreBackend,
        ObjectStoreSettings, StorageBackend, StoreRequest, StoredObject, UrlOptions,
    },
    models::{BackendKind, FileObject, IncomingFile, ListQuery, ListScope, UploadOptions},
    services::{
        registry::RegistryResult, FileValidator, MetadataRegistry, OrchestratorSettings,
        RegistryError, SqliteRegistry, UploadOrchestrator, UploadPolicy, UrlResolver,
    },
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    /// Write the bytes, then report a transient failure.
    FailAfterWrite,
    /// Refuse without writing.
    Reject,
    /// Write the bytes, then never return.
    HangAfterWrite,
    /// Write the bytes after a short pause.
    Delay(u64),
    FailDelete,
    FailResolve,
}

/// Wraps a real backend and injects failures around it.
pub struct FaultyBackend {
    inner: Arc<dyn StorageBackend>,
    fault: Mutex<Fault>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub store_calls: AtomicUsize,
}

impl FaultyBackend {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            fault: Mutex::new(Fault::None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            store_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock().unwrap() = fault;
    }

    fn fault(&self) -> Fault {
        *self.fault.lock().unwrap()
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn store(&self, request: StoreRequest<'_>) -> BackendResult<StoredObject> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.fault() {
            Fault::Reject => Err(BackendError::Rejected("quota exceeded".into())),
            Fault::FailAfterWrite => {
                self.inner.store(request).await?;
                Err(BackendError::Unavailable("connection reset".into()))
            }
            Fault::HangAfterWrite => {
                self.inner.store(request).await?;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(BackendError::Unavailable("unreachable".into()))
            }
            Fault::Delay(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                self.inner.store(request).await
            }
            _ => self.inner.store(request).await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, object: &FileObject) -> BackendResult<()> {
        if self.fault() == Fault::FailDelete {
            return Err(BackendError::Unavailable("delete refused".into()));
        }
        self.inner.delete(object).await
    }

    async fn resolve_url(&self, object: &FileObject, options: &UrlOptions) -> BackendResult<String> {
        if self.fault() == Fault::FailResolve {
            return Err(BackendError::Unavailable("signer offline".into()));
        }
        self.inner.resolve_url(object, options).await
    }

    async fn list(&self, prefix: Option<&str>) -> BackendResult<Vec<BackendEntry>> {
        self.inner.list(prefix).await
    }
}

/// Registry whose `create` can be made to fail.
pub struct FlakyRegistry {
    pub inner: SqliteRegistry,
    pub fail_create: Mutex<bool>,
}

#[async_trait]
impl MetadataRegistry for FlakyRegistry {
    async fn create(&self, object: &FileObject) -> RegistryResult<Uuid> {
        let fail = *self.fail_create.lock().unwrap();
        if fail {
            return Err(RegistryError::Conflict("injected failure".into()));
        }
        self.inner.create(object).await
    }

    async fn get(&self, id: Uuid) -> RegistryResult<FileObject> {
        self.inner.get(id).await
    }

    async fn tombstone(&self, id: Uuid) -> RegistryResult<FileObject> {
        self.inner.tombstone(id).await
    }

    async fn delete(&self, id: Uuid) -> RegistryResult<bool> {
        self.inner.delete(id).await
    }

    async fn discard(&self, id: Uuid) -> RegistryResult<()> {
        self.inner.discard(id).await
    }

    async fn list(&self, query: &ListQuery) -> RegistryResult<Vec<FileObject>> {
        self.inner.list(query).await
    }

    async fn list_tombstoned(&self, limit: usize) -> RegistryResult<Vec<FileObject>> {
        self.inner.list_tombstoned(limit).await
    }

    async fn ping(&self) -> RegistryResult<()> {
        self.inner.ping().await
    }
}

pub struct Harness {
    pub orchestrator: UploadOrchestrator,
    pub registry: Arc<FlakyRegistry>,
    pub local: Arc<LocalBackend>,
    pub local_faults: Arc<FaultyBackend>,
    pub memory: Arc<InMemory>,
    pub memory_faults: Arc<FaultyBackend>,
    pub dir: TempDir,
}

pub struct HarnessOptions {
    pub policy: UploadPolicy,
    pub settings: OrchestratorSettings,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            policy: UploadPolicy::default(),
            settings: OrchestratorSettings {
                worker_pool_size: 4,
                max_batch_files: 10,
                backend_timeout: Duration::from_secs(5),
            },
        }
    }
}

pub async fn harness() -> Harness {
    harness_with(HarnessOptions::default()).await
}

pub async fn harness_with(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalBackend::new(dir.path(), "/uploads").await.unwrap());
    let local_faults = Arc::new(FaultyBackend::new(local.clone()));

    let memory = Arc::new(InMemory::new());
    let s3 = ObjectStoreBackend::new(
        memory.clone(),
        ObjectStoreSettings {
            bucket: "vault".into(),
            region: "eu-west-3".into(),
            endpoint: None,
            public_base_url: None,
            multipart_threshold: 10 * 1024 * 1024,
            part_size: 10 * 1024 * 1024,
        },
    );
    let memory_faults = Arc::new(FaultyBackend::new(Arc::new(s3)));

    let backends = BackendSet::new(BackendKind::Local)
        .with_backend(local_faults.clone())
        .with_backend(memory_faults.clone());

    let registry = Arc::new(FlakyRegistry {
        inner: SqliteRegistry::in_memory().await.unwrap(),
        fail_create: Mutex::new(false),
    });

    let resolver = UrlResolver::new(backends.clone(), 3600, options.settings.backend_timeout);
    let orchestrator = UploadOrchestrator::new(
        FileValidator::new(options.policy),
        backends,
        registry.clone(),
        resolver,
        options.settings,
    );

    Harness {
        orchestrator,
        registry,
        local,
        local_faults,
        memory,
        memory_faults,
        dir,
    }
}

impl Harness {
    /// Stored records owned by `owner`.
    pub async fn records_for(&self, owner: &str) -> Vec<FileObject> {
        self.registry
            .inner
            .list(&ListQuery {
                scope: ListScope::Owner(owner.into()),
                prefix: None,
                provider: None,
            })
            .await
            .unwrap()
    }

    /// Files physically present under the local root.
    pub async fn local_files(&self) -> usize {
        self.local.list(None).await.unwrap().len()
    }

    pub async fn s3_objects(&self) -> usize {
        self.memory_faults.list(None).await.unwrap().len()
    }
}

pub fn pdf(name: &str, size: usize) -> IncomingFile {
    IncomingFile::new(name, Some("application/pdf"), Bytes::from(vec![b'%'; size]))
}

pub fn options(owner: &str) -> UploadOptions {
    UploadOptions::for_owner(owner)
}
