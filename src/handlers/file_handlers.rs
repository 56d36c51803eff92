//! HTTP handlers for uploads, lookups, URL resolution, deletion, and local
//! static downloads. Every upload runs on its own task; if the client goes
//! away the task's cancellation token fires and the orchestrator rolls back.

use crate::{
    backends::{parse_provider, BackendEntry},
    errors::{status_for, AppError},
    models::{
        DeleteOutcome, FileObject, FileSummary, IncomingFile, ListQuery, ListScope,
        ResolveOptions, UploadOptions, UploadReceipt, Visibility,
    },
    services::error::ErrorKind,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;
use uuid::Uuid;

const FALLBACK_FILE_NAME: &str = "upload.bin";

#[derive(Debug, Default)]
struct UploadForm {
    files: Vec<IncomingFile>,
    options: UploadOptions,
}

fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text()).with_kind(ErrorKind::InvalidRequest)
}

async fn text(field: Field<'_>) -> Result<String, AppError> {
    field.text().await.map_err(multipart_error)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Collect file parts and option fields from a multipart body.
async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or(FALLBACK_FILE_NAME)
                    .to_string();
                let mime_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                form.files.push(IncomingFile {
                    file_name,
                    mime_type,
                    data,
                    client_ref: None,
                });
            }
            "owner_id" => form.options.owner_id = text(field).await?,
            "project_id" => form.options.project_id = Some(text(field).await?),
            "folder" => form.options.folder = Some(text(field).await?),
            "provider" => form.options.provider = Some(text(field).await?),
            "visibility" | "public" => {
                let value = text(field).await?;
                let visibility = value
                    .parse::<Visibility>()
                    .map_err(|e| AppError::bad_request(e.to_string()))?;
                form.options.visibility = Some(visibility);
            }
            "generate_derivative" => {
                form.options.generate_derivative = parse_flag(&text(field).await?);
            }
            other => match other.strip_prefix("metadata.") {
                Some(key) if !key.is_empty() => {
                    let key = key.to_string();
                    let value = text(field).await?;
                    form.options.metadata.insert(key, value);
                }
                _ => debug!(field = %other, "ignoring unknown multipart field"),
            },
        }
    }

    Ok(form)
}

/// `POST /files` — upload one file.
pub async fn upload_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadReceipt>), AppError> {
    let UploadForm { mut files, options } = read_upload_form(multipart).await?;
    if files.len() != 1 {
        return Err(AppError::bad_request(format!(
            "expected exactly one `file` part, got {}",
            files.len()
        )));
    }
    let file = files.remove(0);

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.upload(file, &options, &cancel).await });

    let result = task
        .await
        .map_err(|e| AppError::internal(format!("upload task failed: {}", e)))?;
    guard.disarm();

    Ok((StatusCode::CREATED, Json(result?)))
}

#[derive(Debug, Serialize)]
pub struct BatchItemError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BatchItem {
    pub index: usize,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<UploadReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BatchItem>,
}

/// `POST /files/batch` — upload many files; always reports per-file outcomes.
pub async fn upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, AppError> {
    let UploadForm { files, options } = read_upload_form(multipart).await?;

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let orchestrator = state.orchestrator.clone();
    let task =
        tokio::spawn(async move { orchestrator.upload_batch(files, &options, &cancel).await });

    let report = task
        .await
        .map_err(|e| AppError::internal(format!("batch task failed: {}", e)))??;
    guard.disarm();

    let succeeded = report.succeeded();
    let failed = report.failed();
    let results: Vec<BatchItem> = report
        .outcomes
        .into_iter()
        .map(|outcome| {
            let (receipt, error) = match outcome.result {
                Ok(receipt) => (Some(receipt), None),
                Err(err) => (
                    None,
                    Some(BatchItemError {
                        kind: err.kind(),
                        status: status_for(&err).as_u16(),
                        message: err.to_string(),
                    }),
                ),
            };
            BatchItem {
                index: outcome.index,
                file_name: outcome.file_name,
                client_ref: outcome.client_ref,
                receipt,
                error,
            }
        })
        .collect();

    Ok(Json(BatchResponse {
        total: results.len(),
        succeeded,
        failed,
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub owner_id: Option<String>,
    pub project_id: Option<String>,
    pub prefix: Option<String>,
    pub provider: Option<String>,
}

/// `GET /files?owner_id=|project_id=&prefix=&provider=`
pub async fn list_files(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<FileSummary>>, AppError> {
    let scope = match (params.owner_id, params.project_id) {
        (Some(owner), None) => ListScope::Owner(owner),
        (None, Some(project)) => ListScope::Project(project),
        _ => {
            return Err(AppError::bad_request(
                "exactly one of owner_id or project_id is required",
            ));
        }
    };
    let query = ListQuery {
        scope,
        prefix: params.prefix,
        provider: parse_provider(params.provider.as_deref())?,
    };

    Ok(Json(state.orchestrator.list(&query).await?))
}

/// `GET /files/{id}` — full registry record.
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FileObject>, AppError> {
    Ok(Json(state.orchestrator.get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UrlParams {
    pub provider: Option<String>,
    pub download: Option<String>,
    pub expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct UrlResponse {
    pub id: Uuid,
    pub url: String,
}

/// `GET /files/{id}/url?provider=&download=&expires_in=`
pub async fn resolve_file_url(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UrlParams>,
) -> Result<Json<UrlResponse>, AppError> {
    let options = ResolveOptions {
        provider: params.provider,
        force_download: params.download.as_deref().is_some_and(parse_flag),
        expires_in_secs: params.expires_in,
    };
    let url = state.orchestrator.resolve_url(id, &options).await?;
    Ok(Json(UrlResponse { id, url }))
}

#[derive(Debug, Deserialize)]
pub struct ProviderParams {
    pub provider: Option<String>,
}

/// `DELETE /files/{id}?provider=`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ProviderParams>,
) -> Result<StatusCode, AppError> {
    match state.orchestrator.delete(id, params.provider.as_deref()).await? {
        DeleteOutcome::Purged => Ok(StatusCode::NO_CONTENT),
        DeleteOutcome::NotFound => Err(AppError::not_found(format!("file `{}` not found", id))
            .with_kind(ErrorKind::NotFound)),
    }
}

#[derive(Debug, Deserialize)]
pub struct PrefixParams {
    pub prefix: Option<String>,
}

/// `GET /backends/{provider}/objects?prefix=`
pub async fn list_backend_objects(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<PrefixParams>,
) -> Result<Json<Vec<BackendEntry>>, AppError> {
    let entries = state
        .orchestrator
        .list_backend(Some(&provider), params.prefix.as_deref())
        .await?;
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub download: Option<String>,
}

/// `GET {public_path}/{category}/{key}` — stream a locally stored file.
pub async fn serve_local_file(
    State(state): State<AppState>,
    Path((category_dir, key)): Path<(String, String)>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let not_found = || AppError::not_found(format!("`{}/{}` not found", category_dir, key));

    let local = state.local.as_ref().ok_or_else(not_found)?;
    let category = crate::models::Category::from_dir_name(&category_dir).ok_or_else(not_found)?;
    let (file, len) = match local.open(category, &key).await {
        Ok(opened) => opened,
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
            return Err(not_found());
        }
        Err(err) => return Err(AppError::internal(err.to_string())),
    };

    let content_type = mime_guess::from_path(&key).first_or_octet_stream();
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.essence_str())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if params.download.as_deref().is_some_and(parse_flag) {
        let disposition = format!("attachment; filename=\"{}\"", key);
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok(response)
}
