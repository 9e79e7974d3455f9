//! TUS 1.0.0 flavor: creation (with upload and deferred length), offset
//! queries, chunk appends with optional checksums, and termination.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tusky_core::models::{decode_metadata, encode_metadata, NewUpload};
use tusky_core::{AppError, ChecksumAlgorithm};

use super::{body_stream, header_value, location, progress_headers};
use crate::constants::{headers, OFFSET_OCTET_STREAM};
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::upload::{ChunkChecksum, WriteOptions};
use crate::state::AppState;
use crate::utils::headers::{header_str, header_u64};

/// TUS creation. A body sent as `application/offset+octet-stream` is
/// written at offset 0 in the same request.
#[tracing::instrument(skip_all)]
pub async fn create_upload(
    state: &AppState,
    request_headers: &HeaderMap,
    body: Body,
) -> Result<Response, HttpAppError> {
    let size = upload_length(request_headers)?;
    let metadata = match header_str(request_headers, headers::UPLOAD_METADATA) {
        Some(raw) => decode_metadata(raw)?,
        None => Default::default(),
    };
    let original_name = metadata
        .get("filename")
        .or_else(|| metadata.get("name"))
        .cloned();
    let content_type = metadata
        .get("filetype")
        .or_else(|| metadata.get("contentType"))
        .cloned();

    let record = state
        .uploads
        .create(NewUpload {
            id: None,
            original_name,
            content_type,
            size,
            metadata,
        })
        .await?;

    let content_length = header_u64(request_headers, header::CONTENT_LENGTH.as_str())?;
    let with_upload = is_offset_stream(request_headers) && content_length != Some(0);
    let record = if with_upload && !record.is_complete() {
        let options = WriteOptions {
            content_length,
            checksum: upload_checksum(request_headers)?,
            ..Default::default()
        };
        state
            .uploads
            .write_chunk(&record.id, 0, body_stream(body), options)
            .await?
            .record
    } else {
        record
    };

    let mut response_headers = progress_headers(&record)?;
    response_headers.insert(header::LOCATION, header_value(location(&record.id))?);
    Ok((StatusCode::CREATED, response_headers).into_response())
}

/// TUS offset query. Reconciles the record with the backend first so a
/// resuming client sees every byte that reached storage.
pub async fn head_upload(state: &AppState, id: &str) -> Result<Response, HttpAppError> {
    let record = state.uploads.current(id).await?;

    let mut response_headers = progress_headers(&record)?;
    match record.size {
        Some(size) => {
            response_headers.insert(headers::UPLOAD_LENGTH, HeaderValue::from(size));
        }
        None => {
            response_headers.insert(headers::UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1"));
        }
    }
    if !record.metadata.is_empty() {
        response_headers.insert(
            headers::UPLOAD_METADATA,
            header_value(encode_metadata(&record.metadata))?,
        );
    }
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, response_headers).into_response())
}

/// Append a chunk (TUS)
#[utoipa::path(
    patch,
    path = "/files/{id}",
    tag = "tus",
    params(
        ("id" = String, Path, description = "Upload id"),
        ("Tus-Resumable" = String, Header, description = "Must be 1.0.0"),
        ("Upload-Offset" = u64, Header, description = "Byte offset of this chunk"),
        ("Upload-Length" = Option<u64>, Header, description = "Total length of a deferred-length upload"),
        ("Upload-Checksum" = Option<String>, Header, description = "`<algorithm> <base64 digest>` of this chunk")
    ),
    request_body(content = Vec<u8>, content_type = "application/offset+octet-stream"),
    responses(
        (status = 204, description = "Chunk accepted; new offset in Upload-Offset"),
        (status = 400, description = "Missing or invalid Upload-Offset", body = ErrorResponse),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 409, description = "Upload-Offset does not match the current offset", body = ErrorResponse),
        (status = 410, description = "Upload expired", body = ErrorResponse),
        (status = 412, description = "Unsupported Tus-Resumable version", body = ErrorResponse),
        (status = 413, description = "Chunk exceeds the upload length", body = ErrorResponse),
        (status = 415, description = "Wrong Content-Type", body = ErrorResponse),
        (status = 460, description = "Checksum mismatch", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request_headers, body), fields(upload_id = %id))]
pub async fn patch_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> Result<Response, HttpAppError> {
    if !is_offset_stream(&request_headers) {
        return Err(AppError::UnsupportedMediaType(format!(
            "PATCH requires Content-Type: {}",
            OFFSET_OCTET_STREAM
        ))
        .into());
    }
    let offset = header_u64(&request_headers, headers::UPLOAD_OFFSET)?
        .ok_or_else(|| AppError::BadRequest("Upload-Offset header is required".to_string()))?;

    let options = WriteOptions {
        declared_size: header_u64(&request_headers, headers::UPLOAD_LENGTH)?,
        content_length: header_u64(&request_headers, header::CONTENT_LENGTH.as_str())?,
        checksum: upload_checksum(&request_headers)?,
        ..Default::default()
    };

    let outcome = state
        .uploads
        .write_chunk(&id, offset, body_stream(body), options)
        .await?;

    Ok((StatusCode::NO_CONTENT, progress_headers(&outcome.record)?).into_response())
}

/// `Upload-Length`, or `None` with `Upload-Defer-Length: 1`.
fn upload_length(request_headers: &HeaderMap) -> Result<Option<u64>, AppError> {
    if let Some(length) = header_u64(request_headers, headers::UPLOAD_LENGTH)? {
        return Ok(Some(length));
    }
    match header_str(request_headers, headers::UPLOAD_DEFER_LENGTH) {
        Some("1") => Ok(None),
        Some(other) => Err(AppError::BadRequest(format!(
            "Upload-Defer-Length must be 1, got {}",
            other
        ))),
        None => Err(AppError::BadRequest(
            "Upload-Length or Upload-Defer-Length is required".to_string(),
        )),
    }
}

/// `Upload-Checksum: <algorithm> <base64>`
fn upload_checksum(request_headers: &HeaderMap) -> Result<Option<ChunkChecksum>, AppError> {
    let Some(raw) = header_str(request_headers, headers::UPLOAD_CHECKSUM) else {
        return Ok(None);
    };
    let (algorithm, expected) = raw
        .split_once(' ')
        .ok_or_else(|| AppError::BadRequest(format!("Invalid Upload-Checksum: {}", raw)))?;
    let algorithm: ChecksumAlgorithm = algorithm
        .parse()
        .map_err(|e: anyhow::Error| AppError::BadRequest(e.to_string()))?;
    Ok(Some(ChunkChecksum {
        algorithm,
        expected: expected.trim().to_string(),
    }))
}

fn is_offset_stream(request_headers: &HeaderMap) -> bool {
    header_str(request_headers, header::CONTENT_TYPE.as_str())
        .and_then(|value| value.split(';').next())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case(OFFSET_OCTET_STREAM))
}
