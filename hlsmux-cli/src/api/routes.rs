//! Catalog, download and health routes.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    Json, Router,
    body::Body,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::Stream;
use hlsmux_engine::{
    CatalogListing, DownloadError, DownloadRequest, DownloadSession, RetentionPolicy,
};
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/catalog", get(catalog))
        .route("/api/download", get(download_query).post(download_json))
        .route("/api/health", get(health))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CatalogParams {
    pub manifest_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub manifest_url: Option<String>,
    pub resolution: Option<String>,
    pub language: Option<String>,
    pub concurrency: Option<usize>,
}

fn require_manifest_url(value: Option<String>) -> ApiResult<String> {
    match value {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => Err(ApiError::bad_request("missing `manifest_url`")),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn catalog(
    State(state): State<AppState>,
    params: Result<Query<CatalogParams>, QueryRejection>,
) -> ApiResult<Json<CatalogListing>> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let manifest_url = require_manifest_url(params.manifest_url)?;

    let mut session = DownloadSession::new((*state.config).clone(), state.collaborators.clone());
    let _cancel_on_drop = session.cancellation_token().drop_guard();

    match tokio::time::timeout(state.request_timeout, session.resolve(&manifest_url)).await {
        Ok(result) => {
            result?;
        }
        Err(_) => return Err(ApiError::timeout("catalog request timed out")),
    }

    Ok(Json(session.list_catalog()))
}

async fn download_query(
    State(state): State<AppState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    run_download(state, params).await
}

async fn download_json(
    State(state): State<AppState>,
    params: Result<Json<DownloadParams>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    run_download(state, params).await
}

/// Resolve, download and mux, then stream the output back as an attachment.
///
/// Dropping the handler future (client gone) cancels the session through the
/// drop guard and purges its directory through `purge`; hitting the request
/// timeout cancels it explicitly.
async fn run_download(state: AppState, params: DownloadParams) -> ApiResult<Response> {
    let manifest_url = require_manifest_url(params.manifest_url)?;
    let request = DownloadRequest {
        resolution: params.resolution,
        language: params.language,
        concurrency: params.concurrency,
    };

    let mut session = DownloadSession::new((*state.config).clone(), state.collaborators.clone());
    let token = session.cancellation_token();
    let cancel_on_drop = token.clone().drop_guard();
    // Held until the body stream takes it over.
    let purge = PurgeOnDrop::for_session(&session);
    info!(session = %session.id(), manifest = %manifest_url, "Download request accepted");

    let work = async {
        session.resolve(&manifest_url).await?;
        session.download(request).await
    };
    let outcome = tokio::time::timeout(state.request_timeout, work).await;

    let output = match outcome {
        Ok(Ok(path)) => path,
        Ok(Err(err)) => {
            discard(&session, purge).await;
            return Err(err.into());
        }
        Err(_) => {
            token.cancel();
            warn!(session = %session.id(), "Download request timed out");
            discard(&session, purge).await;
            return Err(ApiError::timeout(format!(
                "download did not finish within {}s",
                state.request_timeout.as_secs()
            )));
        }
    };
    cancel_on_drop.disarm();

    attachment(&output, purge).await
}

/// Purge a failed session before the error response goes out.
async fn discard(session: &DownloadSession, mut purge: PurgeOnDrop) {
    if purge.disarm().is_some()
        && let Err(e) = session.purge().await
    {
        warn!(session = %session.id(), error = %e, "Failed to purge session directory");
    }
}

async fn attachment(path: &Path, guard: PurgeOnDrop) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|e| ApiError::from(DownloadError::io("opening output", path, e)))?;
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::from(DownloadError::io("reading output metadata", path, e)))?
        .len();

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.mp4".to_string());
    let content_type = content_type_for(path);
    let content_disposition = format!("attachment; filename=\"{filename}\"");

    let body = Body::from_stream(AttachmentStream {
        inner: ReaderStream::new(file),
        _purge: guard,
    });

    Ok((
        [
            (CONTENT_TYPE, content_type.to_string()),
            (CONTENT_DISPOSITION, content_disposition),
            (CONTENT_LENGTH, length.to_string()),
        ],
        body,
    )
        .into_response())
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// Removes a session directory when dropped, unless disarmed.
struct PurgeOnDrop(Option<PathBuf>);

impl PurgeOnDrop {
    /// Armed only under `RetentionPolicy::Purge`.
    fn for_session(session: &DownloadSession) -> Self {
        match session.retention() {
            RetentionPolicy::Purge => Self(Some(session.working_dir().to_path_buf())),
            RetentionPolicy::Retain => Self(None),
        }
    }

    fn disarm(&mut self) -> Option<PathBuf> {
        self.0.take()
    }
}

impl Drop for PurgeOnDrop {
    fn drop(&mut self) {
        let Some(dir) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await
                        && e.kind() != io::ErrorKind::NotFound
                    {
                        warn!(dir = %dir.display(), error = %e, "Failed to purge session directory");
                    }
                });
            }
            Err(_) => {
                let _ = std::fs::remove_dir_all(&dir);
            }
        }
    }
}

struct AttachmentStream {
    inner: ReaderStream<File>,
    _purge: PurgeOnDrop,
}

impl Stream for AttachmentStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
