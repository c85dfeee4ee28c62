//! File item HTTP handlers: upload, metadata, download, rename, delete.

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Extension, Json, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum::routing::{get, post};
use httpdate::fmt_http_date;
use serde::Deserialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::record::{DEFAULT_MIME_TYPE, FileRecord};
use crate::records::JsonRecordStore;
use crate::service::{FileItemService, NewFileItem};

pub type SharedService = Arc<FileItemService<JsonRecordStore>>;

/// Body of `PATCH /api/v1/file-items`; `new_filename` is a stem.
#[derive(Deserialize)]
pub(crate) struct RenameBody {
    id: Uuid,
    new_filename: String,
}

/// File item routes; the service is expected as an `Extension` layer.
pub fn routes() -> Router {
    Router::new()
        .route(
            "/api/v1/file-items",
            post(create_file).patch(rename_file),
        )
        .route(
            "/api/v1/file-items/{id}",
            get(find_file).delete(delete_file),
        )
        .route("/api/v1/file-items/download/{id}", get(download_file))
}

/// Accepts a multipart upload with `file`, `path` and an optional `filename`.
pub async fn create_file(
    Extension(service): Extension<SharedService>,
    mut multipart: Multipart,
) -> Result<(StatusCode, JsonResponse<FileRecord>), ApiError> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut logical_path: Option<String> = None;
    let mut display_name: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let original = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::Unprocessable("file field has no filename".into()))?;
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                file = Some((original, content_type, bytes.to_vec()));
            }
            "path" => logical_path = Some(field.text().await?),
            "filename" => {
                let value = field.text().await?;
                if !value.trim().is_empty() {
                    display_name = Some(value);
                }
            }
            _ => debug!(field = name, "ignoring unknown upload field"),
        }
    }

    let (original_filename, content_type, bytes) =
        file.ok_or_else(|| ApiError::Unprocessable("file field is required".into()))?;
    let logical_path =
        logical_path.ok_or_else(|| ApiError::Unprocessable("path field is required".into()))?;

    let record = service
        .create(NewFileItem {
            original_filename,
            content_type,
            logical_path,
            display_name,
            bytes,
        })
        .await?;
    Ok((StatusCode::CREATED, JsonResponse(record)))
}

/// Returns the metadata of one item.
pub async fn find_file(
    id: Result<Path<Uuid>, PathRejection>,
    Extension(service): Extension<SharedService>,
) -> Result<JsonResponse<FileRecord>, ApiError> {
    let Path(id) = id?;
    Ok(JsonResponse(service.find_by_id(id).await?))
}

/// Streams the stored bytes back as an attachment.
pub async fn download_file(
    id: Result<Path<Uuid>, PathRejection>,
    Extension(service): Extension<SharedService>,
) -> Result<Response, ApiError> {
    let Path(id) = id?;
    let download = service.download_by_id(id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(download.mime_type())
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE)),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(download.filename()))
            .map_err(|_| ApiError::Internal("failed to build response headers".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));
    let last_modified = fmt_http_date(SystemTime::from(download.record.updated_at));
    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&last_modified)
            .map_err(|_| ApiError::Internal("failed to build response headers".into()))?,
    );

    info!(id = %id, size = download.size, "download file item");
    let stream = ReaderStream::new(download.file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

/// Changes the display name; the extension is kept.
pub async fn rename_file(
    Extension(service): Extension<SharedService>,
    body: Result<Json<RenameBody>, JsonRejection>,
) -> Result<JsonResponse<FileRecord>, ApiError> {
    let Json(body) = body?;
    Ok(JsonResponse(service.rename(body.id, &body.new_filename).await?))
}

/// Deletes the item and returns its last known metadata.
pub async fn delete_file(
    id: Result<Path<Uuid>, PathRejection>,
    Extension(service): Extension<SharedService>,
) -> Result<JsonResponse<FileRecord>, ApiError> {
    let Path(id) = id?;
    Ok(JsonResponse(service.delete_by_id(id).await?))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    let encoded = urlencoding::encode(filename);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
