//! Defines routes for the upload service.
//!
//! ## Structure
//! - **Files**
//!   - `POST   /files`            — upload one file (multipart)
//!   - `POST   /files/batch`      — upload many files, per-file outcomes
//!   - `GET    /files`            — list stored files by owner or project
//!   - `GET    /files/{id}`       — registry record
//!   - `GET    /files/{id}/url`   — public or signed URL
//!   - `DELETE /files/{id}`       — delete from backend and registry
//!
//! - **Storage**
//!   - `GET {public_path}/{category}/{key}` — local static download
//!   - `GET /backends/{provider}/objects`    — raw backend listing

use crate::{
    handlers::{
        file_handlers::{
            delete_file, get_file, list_backend_objects, list_files, resolve_file_url,
            serve_local_file, upload_batch, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `public_path` is where local files are served from and
/// `body_limit` caps multipart request bodies.
pub fn routes(public_path: &str, body_limit: usize) -> Router<AppState> {
    let static_route = format!("{}/{{category}}/{{key}}", public_path.trim_end_matches('/'));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file routes
        .route("/files", post(upload_file).get(list_files))
        .route("/files/batch", post(upload_batch))
        .route("/files/{id}", get(get_file).delete(delete_file))
        .route("/files/{id}/url", get(resolve_file_url))
        .route("/backends/{provider}/objects", get(list_backend_objects))
        .route(&static_route, get(serve_local_file))
        .layer(DefaultBodyLimit::max(body_limit))
}
