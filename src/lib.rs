//! Unified file upload and storage service.
//!
//! Uploads are validated, given a fresh storage key, written to one of several
//! backends (local disk, S3-compatible object store, managed media CDN), and
//! committed to a SQLite metadata registry. Any failure after the backend write
//! is rolled back so no orphaned objects or records survive.

pub mod background;
pub mod backends;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use crate::backends::{
    BackendSet, HttpMediaApi, LocalBackend, ManagedMediaBackend, ObjectStoreBackend,
};
use crate::config::AppConfig;
use crate::services::{
    FileValidator, MetadataRegistry, UploadOrchestrator, UrlResolver,
};
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

/// Instantiate every configured backend. The local backend is always present.
pub async fn build_backends(cfg: &AppConfig) -> anyhow::Result<(BackendSet, Arc<LocalBackend>)> {
    let local = Arc::new(LocalBackend::new(&cfg.upload_dir, &cfg.public_path).await?);
    let mut backends = BackendSet::new(cfg.default_provider).with_backend(local.clone());

    if let Some(s3) = &cfg.s3 {
        backends = backends.with_backend(Arc::new(ObjectStoreBackend::from_s3(s3.clone())?));
    }
    if let Some(media) = &cfg.media {
        let api = Arc::new(HttpMediaApi::new(media.clone())?);
        backends = backends.with_backend(Arc::new(ManagedMediaBackend::new(api, media.clone())));
    }

    backends.ensure_default()?;
    Ok((backends, local))
}

pub fn build_orchestrator(
    cfg: &AppConfig,
    backends: BackendSet,
    registry: Arc<dyn MetadataRegistry>,
) -> UploadOrchestrator {
    let resolver = UrlResolver::new(
        backends.clone(),
        cfg.signed_url_expiry_secs,
        cfg.orchestrator.backend_timeout,
    );
    UploadOrchestrator::new(
        FileValidator::new(cfg.policy.clone()),
        backends,
        registry,
        resolver,
        cfg.orchestrator.clone(),
    )
}

pub fn build_router(cfg: &AppConfig, state: AppState) -> Router {
    let public_path = state
        .local
        .as_ref()
        .map(|local| local.public_path().to_string())
        .unwrap_or_else(|| cfg.public_path.clone());
    routes::routes::routes(&public_path, cfg.body_limit()).with_state(state)
}
