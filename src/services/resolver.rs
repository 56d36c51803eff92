//! Turns a stored FileObject into a URL via the backend that holds it.

use crate::backends::{parse_provider, with_timeout, BackendSet, UrlOptions};
use crate::models::{FileObject, FileState, ResolveOptions};
use crate::services::error::{UploadError, UploadResult};
use std::time::Duration;

pub const DEFAULT_EXPIRY_SECS: u64 = 3600;
pub const MIN_EXPIRY_SECS: u64 = 1;
/// Upper bound accepted by S3 presigning.
pub const MAX_EXPIRY_SECS: u64 = 7 * 24 * 3600;

#[derive(Clone)]
pub struct UrlResolver {
    backends: BackendSet,
    default_expiry: Duration,
    timeout: Duration,
}

impl UrlResolver {
    pub fn new(backends: BackendSet, default_expiry_secs: u64, timeout: Duration) -> Self {
        Self {
            backends,
            default_expiry: Duration::from_secs(clamp_expiry(default_expiry_secs)),
            timeout,
        }
    }

    /// Resolve without mutating the object. Only `stored` objects resolve.
    pub async fn resolve(&self, object: &FileObject, options: &ResolveOptions) -> UploadResult<String> {
        if object.state != FileState::Stored {
            return Err(UploadError::NotFound(object.id));
        }
        if let Some(requested) = parse_provider(options.provider.as_deref())? {
            if requested != object.backend {
                return Err(UploadError::NotFound(object.id));
            }
        }

        let backend = self.backends.get(object.backend)?;
        let url_options = UrlOptions {
            expires_in: options
                .expires_in_secs
                .map(|secs| Duration::from_secs(clamp_expiry(secs)))
                .unwrap_or(self.default_expiry),
            force_download: options.force_download,
        };

        let url = with_timeout(self.timeout, "resolve_url", backend.resolve_url(object, &url_options)).await?;
        Ok(url)
    }
}

fn clamp_expiry(secs: u64) -> u64 {
    secs.clamp(MIN_EXPIRY_SECS, MAX_EXPIRY_SECS)
}
