use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{DeleteOutcome, ImageRecord, ImageStore, UploadFile};

/// Multipart form field carrying uploaded images.
pub const UPLOAD_FIELD: &str = "image";

/// Slack on top of the file payload for multipart boundaries and headers.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    store: ImageStore,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        } else {
            debug!(error = %self, %status, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(store: ImageStore) -> Router {
    let limits = store.limits();
    let body_limit = limits
        .max_file_bytes
        .saturating_mul(limits.max_files)
        .saturating_add(MULTIPART_OVERHEAD);
    let image_route = format!("{}/{{name}}", store.public_prefix());

    Router::new()
        .route("/api/images", get(list_images))
        .route("/api/images/{id}", delete(delete_image))
        .route("/api/upload", post(upload_images))
        .route(&image_route, get(serve_image))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(AppState { store })
}

/// Serve until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    store: ImageStore,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().ok();
    info!(?addr, "picture frame server listening");
    axum::serve(listener, router(store).into_make_service())
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("picture frame server exited")?;
    info!("picture frame server stopped");
    Ok(())
}

pub async fn run(
    store: ImageStore,
    bind_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind picture frame server on {bind_addr}"))?;
    serve(listener, store, cancel).await
}

async fn list_images(State(state): State<AppState>) -> Json<Vec<ImageRecord>> {
    let images = state.store.list_images().await;
    debug!(count = images.len(), "GET /api/images");
    Json(images)
}

async fn upload_images(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, StoreError> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!(error = %rejection, "upload request is not multipart");
        StoreError::NotMultipart
    })?;
    let limits = state.store.limits();

    let mut files = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limits.max_file_bytes))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!(field = ?field.name(), "ignoring non-image form field");
            continue;
        }
        if files.len() == limits.max_files {
            return Err(StoreError::TooManyFiles {
                limit: limits.max_files,
            });
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| multipart_error(err, limits.max_file_bytes))?
        {
            if bytes.len() + chunk.len() > limits.max_file_bytes {
                return Err(StoreError::payload_too_large(limits.max_file_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        debug!(
            original = %original_name,
            content_type = ?content_type,
            size = bytes.len(),
            "received upload part"
        );
        files.push(UploadFile {
            bytes,
            original_name,
            content_type,
        });
    }

    let mut records = state.store.upload_images(files).await?;
    let response = if records.len() == 1 {
        Json(records.remove(0)).into_response()
    } else {
        Json(records).into_response()
    };
    Ok(response)
}

fn multipart_error(err: MultipartError, max_file_bytes: usize) -> StoreError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StoreError::payload_too_large(max_file_bytes)
    } else {
        StoreError::Malformed(err.body_text())
    }
}

async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<DeleteOutcome> {
    Json(state.store.delete_image(&id).await)
}

async fn serve_image(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, StoreError> {
    let (bytes, content_type) = state.store.read_image(&name).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn not_found(uri: Uri) -> Response {
    if uri.path().starts_with("/api/") || uri.path() == "/api" {
        warn!(path = %uri.path(), "unhandled API route");
        (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "API endpoint not found".to_string(),
            }),
        )
            .into_response()
    } else {
        (StatusCode::NOT_FOUND, "Resource not found").into_response()
    }
}
