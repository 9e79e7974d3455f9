//! Routes shared by both protocols; `Tus-Resumable` picks the flavor.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tusky_core::{AppError, ChecksumAlgorithm};

use super::{header_value, is_tus_request, multipart, tus};
use crate::constants::{headers, TUS_EXTENSIONS, TUS_VERSION};
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

/// Create an upload
#[utoipa::path(
    post,
    path = "/files",
    tag = "files",
    params(
        ("Tus-Resumable" = Option<String>, Header, description = "Present for TUS creation"),
        ("Upload-Length" = Option<u64>, Header, description = "TUS: total length"),
        ("Upload-Defer-Length" = Option<String>, Header, description = "TUS: `1` when the length is not known yet"),
        ("Upload-Metadata" = Option<String>, Header, description = "TUS: `key base64(value)` pairs"),
        ("Content-Disposition" = Option<String>, Header, description = "Raw body: file name"),
        ("X-File-Name" = Option<String>, Header, description = "Raw body: file name fallback"),
        ("X-Upload-Metadata" = Option<String>, Header, description = "Raw body: JSON object of metadata"),
        ("X-Upload-Content-Length" = Option<u64>, Header, description = "Raw body: total length")
    ),
    request_body(content = Vec<u8>, description = "multipart/form-data, a raw body, or a first TUS chunk"),
    responses(
        (status = 201, description = "Upload created; Location names it", body = tusky_core::UploadRecord),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 412, description = "Unsupported Tus-Resumable version", body = ErrorResponse),
        (status = 413, description = "Upload too large", body = ErrorResponse),
        (status = 415, description = "MIME type not allowed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all, fields(operation = "create_upload"))]
pub async fn post_files(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, HttpAppError> {
    let request_headers = request.headers().clone();
    if is_tus_request(&request_headers) {
        return tus::create_upload(&state, &request_headers, request.into_body()).await;
    }

    let is_multipart = request_headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim_start().starts_with("multipart/form-data"));
    if is_multipart {
        let form = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;
        return multipart::create_multipart(&state, form).await;
    }

    multipart::create_raw(&state, &request_headers, request.into_body()).await
}

/// Upload status as headers
#[utoipa::path(
    head,
    path = "/files/{id}",
    tag = "files",
    params(
        ("id" = String, Path, description = "Upload id"),
        ("Tus-Resumable" = Option<String>, Header, description = "Present for a TUS offset query")
    ),
    responses(
        (status = 200, description = "Upload-Offset and length headers"),
        (status = 404, description = "Upload not found"),
        (status = 410, description = "Upload expired")
    )
)]
#[tracing::instrument(skip(state, request_headers), fields(upload_id = %id))]
pub async fn head_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    if is_tus_request(&request_headers) {
        tus::head_upload(&state, &id).await
    } else {
        multipart::head_upload(&state, &id).await
    }
}

/// Delete an upload (TUS termination included)
#[utoipa::path(
    delete,
    path = "/files/{id}",
    tag = "files",
    params(("id" = String, Path, description = "Upload id")),
    responses(
        (status = 204, description = "Upload deleted"),
        (status = 404, description = "Upload not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(upload_id = %id))]
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpAppError> {
    state.uploads.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Capability discovery
#[utoipa::path(
    options,
    path = "/files",
    tag = "files",
    responses(
        (status = 204, description = "Allow and Tus-* capability headers")
    )
)]
pub async fn options_files(State(state): State<Arc<AppState>>) -> Result<Response, HttpAppError> {
    capabilities(&state, "GET, POST, DELETE, OPTIONS")
}

pub async fn options_file(State(state): State<Arc<AppState>>) -> Result<Response, HttpAppError> {
    capabilities(&state, "GET, HEAD, PUT, PATCH, DELETE, OPTIONS")
}

fn capabilities(state: &AppState, allow: &'static str) -> Result<Response, HttpAppError> {
    let algorithms = ChecksumAlgorithm::ALL
        .iter()
        .map(ChecksumAlgorithm::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ALLOW, HeaderValue::from_static(allow));
    response_headers.insert(headers::TUS_VERSION, HeaderValue::from_static(TUS_VERSION));
    response_headers.insert(
        headers::TUS_EXTENSION,
        HeaderValue::from_static(TUS_EXTENSIONS),
    );
    response_headers.insert(
        headers::TUS_MAX_SIZE,
        HeaderValue::from(state.uploads.max_upload_size()),
    );
    response_headers.insert(headers::TUS_CHECKSUM_ALGORITHM, header_value(algorithms)?);
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}
