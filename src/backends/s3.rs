//! S3-compatible backend built on `object_store`.
//!
//! Objects are written under `folder/stored_key`. Payloads above the multipart
//! threshold go through `put_multipart` in fixed-size parts. Public objects
//! resolve to a stable bucket or CDN URL; private objects need a [`UrlSigner`].

use super::{BackendEntry, BackendError, BackendResult, StorageBackend, StoreRequest, StoredObject, UrlOptions};
use crate::models::{BackendKind, FileObject, Visibility};
use async_trait::async_trait;
use futures::TryStreamExt;
use http::Method;
use object_store::{
    aws::{AmazonS3, AmazonS3Builder},
    path::Path,
    signer::Signer,
    ObjectStore, ObjectStoreExt, PutPayload, WriteMultipart,
};
use std::{sync::Arc, time::{Duration, Instant}};
use tracing::{debug, error, info, warn};

/// Parts allowed in flight before the writer waits.
const MAX_IN_FLIGHT_PARTS: usize = 8;

/// Produces time-limited GET URLs for private objects.
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_get(&self, path: &Path, expires_in: Duration) -> BackendResult<String>;
}

/// Presigner backed by the same S3 client used for writes.
pub struct S3UrlSigner {
    store: Arc<AmazonS3>,
}

impl S3UrlSigner {
    pub fn new(store: Arc<AmazonS3>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl UrlSigner for S3UrlSigner {
    async fn sign_get(&self, path: &Path, expires_in: Duration) -> BackendResult<String> {
        let url = self
            .store
            .signed_url(Method::GET, path, expires_in)
            .await
            .map_err(map_store_error)?;
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub public_base_url: Option<String>,
    pub multipart_threshold: usize,
    pub part_size: usize,
}

pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn UrlSigner>>,
    settings: ObjectStoreSettings,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, settings: ObjectStoreSettings) -> Self {
        Self {
            store,
            signer: None,
            settings,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn UrlSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Build an S3 client from the ambient AWS credentials plus explicit settings.
    pub fn from_s3(settings: ObjectStoreSettings) -> anyhow::Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(settings.region.clone())
            .with_bucket_name(settings.bucket.clone());
        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let s3 = Arc::new(
            builder
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build S3 object store: {}", e))?,
        );
        let signer: Arc<dyn UrlSigner> = Arc::new(S3UrlSigner::new(s3.clone()));

        info!(bucket = %settings.bucket, region = %settings.region, "object store backend configured");
        Ok(Self::new(s3, settings).with_signer(signer))
    }

    fn location(object: &FileObject) -> Path {
        Path::from(object.logical_path())
    }

    fn public_url(&self, path: &Path) -> String {
        let s = &self.settings;
        match (&s.public_base_url, &s.endpoint) {
            (Some(base), _) => format!("{}/{}", base.trim_end_matches('/'), path),
            (None, Some(endpoint)) => {
                format!("{}/{}/{}", endpoint.trim_end_matches('/'), s.bucket, path)
            }
            (None, None) => format!("https://{}.s3.{}.amazonaws.com/{}", s.bucket, s.region, path),
        }
    }

    async fn put_multipart(&self, path: &Path, data: &[u8]) -> BackendResult<()> {
        let part_size = self.settings.part_size.max(1);
        let upload = self.store.put_multipart(path).await.map_err(map_store_error)?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, part_size);

        for chunk in data.chunks(part_size) {
            if let Err(err) = writer.wait_for_capacity(MAX_IN_FLIGHT_PARTS).await {
                if let Err(abort_err) = writer.abort().await {
                    warn!(path = %path, error = %abort_err, "multipart abort failed");
                }
                return Err(map_store_error(err));
            }
            writer.write(chunk);
        }

        writer.finish().await.map_err(map_store_error)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn store(&self, request: StoreRequest<'_>) -> BackendResult<StoredObject> {
        let path = Self::location(request.object);
        let size = request.data.len();
        let multipart = size > self.settings.multipart_threshold;
        let start = Instant::now();

        let result = if multipart {
            self.put_multipart(&path, &request.data).await
        } else {
            self.store
                .put(&path, PutPayload::from(request.data))
                .await
                .map(|_| ())
                .map_err(map_store_error)
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(()) => {
                info!(
                    key = %path,
                    size_bytes = size,
                    multipart,
                    duration_ms,
                    "object store put complete"
                );
                Ok(StoredObject {
                    location: path.to_string(),
                    derivative_url: None,
                })
            }
            Err(err) => {
                error!(key = %path, size_bytes = size, duration_ms, error = %err, "object store put failed");
                Err(err)
            }
        }
    }

    async fn delete(&self, object: &FileObject) -> BackendResult<()> {
        let path = Self::location(object);
        match self.store.delete(&path).await {
            Ok(()) => {
                debug!(key = %path, "object deleted");
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                debug!(key = %path, "object already missing");
                Ok(())
            }
            Err(err) => Err(map_store_error(err)),
        }
    }

    async fn resolve_url(&self, object: &FileObject, options: &UrlOptions) -> BackendResult<String> {
        let path = Self::location(object);
        match object.visibility {
            Visibility::Public => Ok(self.public_url(&path)),
            Visibility::Private => match &self.signer {
                Some(signer) => signer.sign_get(&path, options.expires_in).await,
                None => Err(BackendError::Rejected(
                    "private objects require a URL signer".to_string(),
                )),
            },
        }
    }

    async fn list(&self, prefix: Option<&str>) -> BackendResult<Vec<BackendEntry>> {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| Path::from(p.to_string()));

        let metas: Vec<_> = self
            .store
            .list(prefix.as_ref())
            .try_collect()
            .await
            .map_err(map_store_error)?;

        Ok(metas
            .into_iter()
            .map(|meta| BackendEntry {
                key: meta.location.to_string(),
                size_bytes: meta.size,
                last_modified: Some(meta.last_modified),
            })
            .collect())
    }
}

fn map_store_error(err: object_store::Error) -> BackendError {
    match err {
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }
        | object_store::Error::AlreadyExists { .. }
        | object_store::Error::Precondition { .. } => BackendError::Rejected(err.to_string()),
        other => BackendError::Unavailable(other.to_string()),
    }
}
