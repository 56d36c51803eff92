//! Local disk backend.
//!
//! Payloads live at `{root}/{category dir}/{stored_key}`. Category directories
//! are created once in [`LocalBackend::new`]; request paths never create
//! directories. Writes go through a temp file that is fsynced and renamed into
//! place, so readers never observe a partially written object.

use super::{BackendEntry, BackendError, BackendResult, StorageBackend, StoreRequest, StoredObject, UrlOptions};
use crate::models::{BackendKind, Category, FileObject};
use crate::services::keys::is_safe_key;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::Instant,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const TMP_PREFIX: &str = ".tmp-";

#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    public_path: String,
}

impl LocalBackend {
    /// Create the root and every category directory. Safe to call repeatedly.
    pub async fn new(root: impl Into<PathBuf>, public_path: &str) -> io::Result<Self> {
        let root = root.into();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.dir_name())).await?;
        }

        let public_path = format!("/{}", public_path.trim_matches('/'));
        debug!(root = %root.display(), public_path = %public_path, "local backend ready");

        Ok(Self { root, public_path })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_path(&self) -> &str {
        &self.public_path
    }

    fn object_path(&self, category: Category, key: &str) -> BackendResult<PathBuf> {
        if !is_safe_key(key) {
            return Err(BackendError::Rejected(format!("invalid storage key `{}`", key)));
        }
        Ok(self.root.join(category.dir_name()).join(key))
    }

    /// Open a stored payload for static serving. Returns the file and its length.
    pub async fn open(&self, category: Category, key: &str) -> io::Result<(File, u64)> {
        let path = self
            .object_path(category, key)
            .map_err(|err| io::Error::new(ErrorKind::InvalidInput, err.to_string()))?;
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Write, read back, and remove a small file under the root.
    pub async fn probe(&self) -> io::Result<()> {
        let path = self.root.join(format!("{}probe-{}", TMP_PREFIX, Uuid::new_v4()));
        let payload = b"readyz";
        fs::write(&path, payload).await?;
        let read_back = fs::read(&path).await;
        let _ = fs::remove_file(&path).await;
        if read_back? != payload {
            return Err(io::Error::other("probe payload mismatch"));
        }
        Ok(())
    }

    async fn write_atomically(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| io::Error::other("object path missing parent directory"))?;
        let tmp_path = parent.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        if let Err(err) = file.write_all(data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        drop(file);

        // Keys are never reused, so an existing target means a conflicting writer.
        if fs::try_exists(path).await.unwrap_or(false) {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        if let Err(err) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn store(&self, request: StoreRequest<'_>) -> BackendResult<StoredObject> {
        let object = request.object;
        let path = self.object_path(object.category, &object.stored_key)?;
        let start = Instant::now();

        self.write_atomically(&path, &request.data).await?;

        info!(
            key = %object.stored_key,
            path = %path.display(),
            size_bytes = request.data.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "local store complete"
        );

        Ok(StoredObject {
            location: format!("{}/{}", object.category.dir_name(), object.stored_key),
            derivative_url: None,
        })
    }

    async fn delete(&self, object: &FileObject) -> BackendResult<()> {
        let path = self.object_path(object.category, &object.stored_key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %object.stored_key, "removed local file");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(key = %object.stored_key, "local file already missing");
                Ok(())
            }
            Err(err) => {
                warn!(key = %object.stored_key, error = %err, "local delete failed");
                Err(err.into())
            }
        }
    }

    async fn resolve_url(&self, object: &FileObject, options: &UrlOptions) -> BackendResult<String> {
        let mut url = format!(
            "{}/{}/{}",
            self.public_path.trim_end_matches('/'),
            object.category.dir_name(),
            object.stored_key
        );
        if options.force_download {
            url.push_str("?download=1");
        }
        Ok(url)
    }

    async fn list(&self, prefix: Option<&str>) -> BackendResult<Vec<BackendEntry>> {
        let mut entries = Vec::new();
        for category in Category::ALL {
            let dir = self.root.join(category.dir_name());
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(read_dir) => read_dir,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            while let Some(entry) = read_dir.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(TMP_PREFIX) {
                    continue;
                }
                let key = format!("{}/{}", category.dir_name(), name);
                if prefix.is_some_and(|p| !key.starts_with(p)) {
                    continue;
                }
                let metadata = entry.metadata().await?;
                if !metadata.is_file() {
                    continue;
                }
                entries.push(BackendEntry {
                    key,
                    size_bytes: metadata.len(),
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
