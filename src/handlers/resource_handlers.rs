//! HTTP handlers for files and directories under `/api`.
//!
//! Handlers only translate HTTP into facade calls: they pull the caller's
//! identity, reject blank parameters and shape responses. Path rules live in
//! the services.

use super::auth::AuthenticatedUser;
use crate::{
    errors::AppError,
    models::Resource,
    services::{Download, StorageService, UploadFile},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;

/// Multipart field carrying uploaded files.
const UPLOAD_FIELD: &str = "object";

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoveQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

/// `POST /api/resource?path=` — upload every `object` part into `path`.
pub async fn upload_resource(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let path = required(q.path, "path")?;

    // Parts are stored in arrival order, each streamed straight from the
    // request body. A failing part leaves the earlier ones stored.
    let mut uploaded = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();

        let file = UploadFile {
            filename,
            content_type,
            size: None,
            body,
        };
        uploaded.push(service.upload_file(user, &path, file).await?);
    }

    if uploaded.is_empty() {
        return Err(AppError::bad_request(format!(
            "Multipart field '{}' is required",
            UPLOAD_FIELD
        )));
    }

    Ok((StatusCode::CREATED, Json(uploaded)))
}

/// `GET /api/resource?path=`
pub async fn get_resource(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
) -> Result<Json<Resource>, AppError> {
    let path = required(q.path, "path")?;
    Ok(Json(service.resource_info(user, &path).await?))
}

/// `DELETE /api/resource?path=` — a trailing `/` deletes the whole directory.
pub async fn delete_resource(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
) -> Result<StatusCode, AppError> {
    let path = required(q.path, "path")?;
    service.delete_resource(user, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/resource/download?path=` — file bytes, or a zip for directories.
///
/// Both bodies are streamed. For archives, errors found before the first
/// byte become normal error responses; later ones abort the body.
pub async fn download_resource(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
) -> Result<Response, AppError> {
    let path = required(q.path, "path")?;

    let (body, content_type, filename) = match service.download(user, &path).await? {
        Download::File(reader) => (
            Body::from_stream(ReaderStream::new(reader)),
            "application/octet-stream",
            file_name(&path).to_string(),
        ),
        Download::Archive(archive) => {
            let filename = format!("{}.zip", archive.root_name());
            (
                Body::from_stream(archive.into_byte_stream()),
                "application/zip",
                filename,
            )
        }
    };

    let mut response = Response::new(body);
    set_download_headers(response.headers_mut(), content_type, &filename)?;
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// `GET /api/resource/move?from=&to=`
pub async fn move_resource(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<MoveQuery>,
) -> Result<Json<Resource>, AppError> {
    let from = required(q.from, "from")?;
    let to = required(q.to, "to")?;
    Ok(Json(service.move_resource(user, &from, &to).await?))
}

/// `GET /api/resource/search?query=`
pub async fn search_resources(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Resource>>, AppError> {
    let query = required(q.query, "query")?;
    Ok(Json(service.search(user, &query).await?))
}

/// `POST /api/directory?path=`
pub async fn create_directory(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
) -> Result<impl IntoResponse, AppError> {
    let path = required(q.path, "path")?;
    let created = service.create_directory(user, &path).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET /api/directory?path=` — a missing or empty path lists the root.
pub async fn list_directory(
    State(service): State<StorageService>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(q): Query<PathQuery>,
) -> Result<Json<Vec<Resource>>, AppError> {
    let path = q.path.unwrap_or_default();
    Ok(Json(service.list_directory(user, &path).await?))
}

fn required(value: Option<String>, name: &str) -> Result<String, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::bad_request(format!(
            "Query parameter '{}' must not be blank",
            name
        ))),
    }
}

/// Last segment of a file path.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn set_download_headers(
    headers: &mut HeaderMap,
    content_type: &'static str,
    filename: &str,
) -> Result<(), AppError> {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));

    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    let value = HeaderValue::from_str(&disposition)
        .map_err(|err| AppError::internal(format!("invalid download file name: {}", err)))?;
    headers.insert(header::CONTENT_DISPOSITION, value);
    Ok(())
}
