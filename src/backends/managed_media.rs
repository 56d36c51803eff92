//! Managed media/CDN backend.
//!
//! Uploads are delegated to a hosted media API through the [`MediaApi`] seam.
//! The public id is the object's `folder/stored_key` (extension dropped for
//! image and video assets), so delivery URLs always end with the logical path.
//! Derivatives are requested on a spawned task and never delay `store`.

use super::{BackendEntry, BackendError, BackendResult, StorageBackend, StoreRequest, StoredObject, UrlOptions};
use crate::models::{BackendKind, Category, FileObject, Visibility};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{
    multipart::{Form, Part},
    Client, StatusCode,
};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, fmt, sync::Arc, time::Instant};
use tracing::{debug, info, warn};

/// Eager thumbnail transformation.
pub const THUMBNAIL_TRANSFORMATION: &str = "c_fill,w_300,h_300";

const RESOURCE_TYPES: [&str; 3] = ["image", "video", "raw"];

#[derive(Clone)]
pub struct ManagedMediaSettings {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base_url: String,
    pub delivery_base_url: String,
    /// Prefix applied in front of every object folder.
    pub root_folder: Option<String>,
}

impl fmt::Debug for ManagedMediaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedMediaSettings")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("delivery_base_url", &self.delivery_base_url)
            .field("root_folder", &self.root_folder)
            .finish()
    }
}

/// One upload handed to the media API.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub public_id: String,
    pub resource_type: &'static str,
    pub authenticated: bool,
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaAsset {
    pub public_id: String,
    #[serde(default)]
    pub bytes: u64,
    #[serde(default)]
    pub format: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait MediaApi: Send + Sync {
    async fn upload(&self, upload: MediaUpload) -> BackendResult<MediaAsset>;

    /// Remove an asset. A missing asset is not an error.
    async fn destroy(&self, public_id: &str, resource_type: &str) -> BackendResult<()>;

    async fn request_derivative(
        &self,
        public_id: &str,
        resource_type: &str,
        transformation: &str,
    ) -> BackendResult<()>;

    async fn list(&self, resource_type: &str, prefix: Option<&str>) -> BackendResult<Vec<MediaAsset>>;
}

/// Resource family the media provider files a category under.
pub fn resource_type(category: Category) -> &'static str {
    match category {
        Category::Image => "image",
        Category::Audio | Category::Video => "video",
        Category::Document => "raw",
    }
}

/// Hex sha256 over `k=v` pairs joined by `&` in key order, followed by the secret.
pub fn sign_params(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn sign_delivery_path(path: &str, expires_at: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}?expires_at={}", path, expires_at).as_bytes());
    hasher.update(secret.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

pub struct HttpMediaApi {
    client: Client,
    settings: ManagedMediaSettings,
}

#[derive(Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    resources: Vec<MediaAsset>,
}

impl HttpMediaApi {
    pub fn new(settings: ManagedMediaSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build media API client: {}", e))?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!(
            "{}/v1_1/{}/{}/{}",
            self.settings.api_base_url.trim_end_matches('/'),
            self.settings.cloud_name,
            resource_type,
            action
        )
    }

    /// Signed form with every parameter plus `api_key`, `timestamp` and `signature`.
    fn signed_form(&self, mut params: BTreeMap<&'static str, String>) -> Form {
        params.insert("timestamp", Utc::now().timestamp().to_string());
        let signature = sign_params(&params, &self.settings.api_secret);

        let mut form = Form::new();
        for (k, v) in params {
            form = form.text(k, v);
        }
        form.text("api_key", self.settings.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
    }

    async fn post_form<T: serde::de::DeserializeOwned>(&self, url: String, form: Form) -> BackendResult<T> {
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("media API request failed: {}", e)))?;
        read_json(response).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> BackendResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let message = format!("media API returned {}: {}", status, body);
        return Err(classify_status(status, message));
    }
    response
        .json()
        .await
        .map_err(|e| BackendError::Unavailable(format!("invalid media API response: {}", e)))
}

fn classify_status(status: StatusCode, message: String) -> BackendError {
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        BackendError::Unavailable(message)
    } else {
        BackendError::Rejected(message)
    }
}

#[async_trait]
impl MediaApi for HttpMediaApi {
    async fn upload(&self, upload: MediaUpload) -> BackendResult<MediaAsset> {
        let access_mode = if upload.authenticated { "authenticated" } else { "public" };
        let params = BTreeMap::from([
            ("public_id", upload.public_id.clone()),
            ("access_mode", access_mode.to_string()),
            ("overwrite", "false".to_string()),
            ("invalidate", "true".to_string()),
        ]);
        let part = Part::bytes(upload.data.to_vec()).file_name(upload.file_name.clone());
        let form = self.signed_form(params).part("file", part);

        self.post_form(self.endpoint(upload.resource_type, "upload"), form)
            .await
    }

    async fn destroy(&self, public_id: &str, resource_type: &str) -> BackendResult<()> {
        let params = BTreeMap::from([
            ("public_id", public_id.to_string()),
            ("invalidate", "true".to_string()),
        ]);
        let response: DestroyResponse = self
            .post_form(self.endpoint(resource_type, "destroy"), self.signed_form(params))
            .await?;

        match response.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(BackendError::Rejected(format!("destroy returned `{}`", other))),
        }
    }

    async fn request_derivative(
        &self,
        public_id: &str,
        resource_type: &str,
        transformation: &str,
    ) -> BackendResult<()> {
        let params = BTreeMap::from([
            ("public_id", public_id.to_string()),
            ("type", "upload".to_string()),
            ("eager", transformation.to_string()),
            ("eager_async", "true".to_string()),
        ]);
        let _: serde_json::Value = self
            .post_form(self.endpoint(resource_type, "explicit"), self.signed_form(params))
            .await?;
        Ok(())
    }

    async fn list(&self, resource_type: &str, prefix: Option<&str>) -> BackendResult<Vec<MediaAsset>> {
        let url = format!(
            "{}/v1_1/{}/resources/{}/upload",
            self.settings.api_base_url.trim_end_matches('/'),
            self.settings.cloud_name,
            resource_type
        );
        let mut query = vec![("max_results", "500".to_string())];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.settings.api_key, Some(&self.settings.api_secret))
            .query(&query)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("media API request failed: {}", e)))?;
        let body: ListResponse = read_json(response).await?;
        Ok(body.resources)
    }
}

pub struct ManagedMediaBackend {
    api: Arc<dyn MediaApi>,
    settings: ManagedMediaSettings,
}

impl ManagedMediaBackend {
    pub fn new(api: Arc<dyn MediaApi>, settings: ManagedMediaSettings) -> Self {
        Self { api, settings }
    }

    /// Folder-qualified path, with the configured root folder in front.
    fn delivery_path(&self, object: &FileObject) -> String {
        match self.settings.root_folder.as_deref().map(|f| f.trim_matches('/')) {
            Some(root) if !root.is_empty() => format!("{}/{}", root, object.logical_path()),
            _ => object.logical_path(),
        }
    }

    fn public_id(&self, object: &FileObject) -> String {
        let path = self.delivery_path(object);
        if resource_type(object.category) == "raw" {
            return path;
        }
        match path.rsplit_once('.') {
            Some((stem, _)) if !stem.ends_with('/') => stem.to_string(),
            _ => path,
        }
    }

    fn base(&self, object: &FileObject) -> String {
        format!(
            "{}/{}/{}",
            self.settings.delivery_base_url.trim_end_matches('/'),
            self.settings.cloud_name,
            resource_type(object.category)
        )
    }

    fn derivative_url(&self, object: &FileObject) -> String {
        let target = match object.category {
            Category::Video => format!("{}.jpg", self.public_id(object)),
            _ => self.delivery_path(object),
        };
        format!("{}/upload/{}/{}", self.base(object), THUMBNAIL_TRANSFORMATION, target)
    }
}

#[async_trait]
impl StorageBackend for ManagedMediaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ManagedMedia
    }

    async fn store(&self, request: StoreRequest<'_>) -> BackendResult<StoredObject> {
        let object = request.object;
        let public_id = self.public_id(object);
        let kind = resource_type(object.category);
        let size = request.data.len();
        let start = Instant::now();

        let asset = self
            .api
            .upload(MediaUpload {
                public_id: public_id.clone(),
                resource_type: kind,
                authenticated: object.visibility == Visibility::Private,
                file_name: object.stored_key.clone(),
                data: request.data,
            })
            .await?;

        info!(
            key = %object.stored_key,
            public_id = %asset.public_id,
            size_bytes = size,
            duration_ms = start.elapsed().as_millis() as u64,
            "managed media upload complete"
        );

        let wants_derivative = request.generate_derivative
            && matches!(object.category, Category::Image | Category::Video);
        let derivative_url = if wants_derivative {
            let api = self.api.clone();
            let id = public_id.clone();
            tokio::spawn(async move {
                if let Err(err) = api.request_derivative(&id, kind, THUMBNAIL_TRANSFORMATION).await {
                    warn!(public_id = %id, error = %err, "derivative request failed");
                }
            });
            Some(self.derivative_url(object))
        } else {
            if request.generate_derivative {
                debug!(key = %object.stored_key, category = %object.category, "derivatives not supported for category");
            }
            None
        };

        Ok(StoredObject {
            location: asset.public_id,
            derivative_url,
        })
    }

    async fn delete(&self, object: &FileObject) -> BackendResult<()> {
        let public_id = self.public_id(object);
        self.api
            .destroy(&public_id, resource_type(object.category))
            .await?;
        debug!(public_id = %public_id, "managed media asset destroyed");
        Ok(())
    }

    async fn resolve_url(&self, object: &FileObject, options: &UrlOptions) -> BackendResult<String> {
        let flags = if options.force_download { "fl_attachment/" } else { "" };
        let path = self.delivery_path(object);

        match object.visibility {
            Visibility::Public => Ok(format!("{}/upload/{}{}", self.base(object), flags, path)),
            Visibility::Private => {
                let expires_at = Utc::now().timestamp() + options.expires_in.as_secs() as i64;
                let signed_path = format!("{}{}", flags, path);
                let signature = sign_delivery_path(&signed_path, expires_at, &self.settings.api_secret);
                Ok(format!(
                    "{}/authenticated/{}?expires_at={}&signature={}",
                    self.base(object),
                    signed_path,
                    expires_at,
                    signature
                ))
            }
        }
    }

    async fn list(&self, prefix: Option<&str>) -> BackendResult<Vec<BackendEntry>> {
        let mut entries = Vec::new();
        for kind in RESOURCE_TYPES {
            for asset in self.api.list(kind, prefix).await? {
                let key = match &asset.format {
                    Some(format) if kind != "raw" => format!("{}.{}", asset.public_id, format),
                    _ => asset.public_id.clone(),
                };
                entries.push(BackendEntry {
                    key,
                    size_bytes: asset.bytes,
                    last_modified: asset.created_at,
                });
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}
