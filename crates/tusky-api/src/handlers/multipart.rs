//! Plain HTTP upload flavor: multipart and raw-body creation, explicit-id
//! PUT with `Content-Range`, downloads, listing and deletion.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tusky_core::models::NewUpload;
use tusky_core::{AppError, UploadRecord};
use tusky_storage::{ByteStream, StorageError};
use utoipa::ToSchema;

use super::{body_stream, header_value, location, progress_headers};
use crate::constants::headers;
use crate::error::{ErrorResponse, HttpAppError};
use crate::services::upload::{BatchDeleteResult, BatchDeleteStatus, WriteOptions};
use crate::state::AppState;
use crate::utils::headers::{
    attachment_disposition, disposition_filename, header_str, header_u64, http_date,
    parse_content_range, parse_range, ContentRange,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse {
    pub items: Vec<UploadRecord>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteQuery {
    /// Comma-separated upload ids
    pub ids: Option<String>,
}

/// Body of a batch delete (a bare JSON array is accepted too)
#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchDeleteRequest {
    pub ids: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchDeleteBody {
    Object(BatchDeleteRequest),
    Ids(Vec<String>),
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BatchDeleteResponse {
    pub results: Vec<BatchDeleteResult>,
}

/// `multipart/form-data` creation; the upload completes within the request.
#[tracing::instrument(skip_all)]
pub async fn create_multipart(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<Response, HttpAppError> {
    let mut metadata = BTreeMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        HttpAppError::from(AppError::BadRequest(format!(
            "Failed to read multipart field: {}",
            e
        )))
    })? {
        if field.file_name().is_none() {
            if field.name() == Some("metadata") {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read metadata field: {}", e))
                })?;
                metadata = metadata_from_json(&text)?;
            }
            continue;
        }

        let new = NewUpload {
            id: None,
            original_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
            size: None,
            metadata,
        };
        let record = state.uploads.create(new).await?;

        let body: ByteStream<'_> = Box::pin(
            field.map(|chunk| chunk.map_err(|e| StorageError::StreamAborted(e.to_string()))),
        );
        let options = WriteOptions {
            final_chunk: true,
            ..Default::default()
        };
        let outcome = match state.uploads.write_chunk(&record.id, 0, body, options).await {
            Ok(outcome) => outcome,
            Err(e) => {
                discard(state, &record.id).await;
                return Err(e.into());
            }
        };
        return created_response(&outcome.record);
    }

    Err(AppError::BadRequest("Multipart body has no file part".to_string()).into())
}

/// Raw-body creation; see [`raw_new_upload`] for the header rules.
#[tracing::instrument(skip_all)]
pub async fn create_raw(
    state: &AppState,
    request_headers: &HeaderMap,
    body: Body,
) -> Result<Response, HttpAppError> {
    let range = content_range(request_headers)?;
    if let Some(ContentRange::Bytes { start, .. }) = range {
        if start != 0 {
            return Err(AppError::BadRequest(format!(
                "A new upload starts at byte 0, got Content-Range start {}",
                start
            ))
            .into());
        }
    }

    let record = state
        .uploads
        .create(raw_new_upload(None, request_headers, range)?)
        .await?;

    let record = match plan_write(request_headers, range, &record)? {
        Some((offset, options)) => {
            match state
                .uploads
                .write_chunk(&record.id, offset, body_stream(body), options)
                .await
            {
                Ok(outcome) => outcome.record,
                Err(e) => {
                    discard(state, &record.id).await;
                    return Err(e.into());
                }
            }
        }
        None => record,
    };
    created_response(&record)
}

/// Create-or-update an upload with a client-chosen id
#[utoipa::path(
    put,
    path = "/files/{id}",
    tag = "files",
    params(
        ("id" = String, Path, description = "Upload id"),
        ("Content-Range" = Option<String>, Header, description = "`bytes a-b/total`, `bytes a-b/*` or `bytes */total` (status query)"),
        ("X-Range-Hash" = Option<String>, Header, description = "Expected hash of the bytes before the range start")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Chunk written", body = UploadRecord),
        (status = 201, description = "Upload created", body = UploadRecord),
        (status = 409, description = "Range start does not match the stored length", body = ErrorResponse),
        (status = 413, description = "Upload too large", body = ErrorResponse),
        (status = 415, description = "MIME type not allowed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request_headers, body), fields(upload_id = %id))]
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> Result<Response, HttpAppError> {
    let range = content_range(&request_headers)?;
    let created = state
        .uploads
        .create_or_get(raw_new_upload(Some(id.clone()), &request_headers, range)?)
        .await?;

    let (record, range_hash) = match plan_write(&request_headers, range, &created.record)? {
        Some((offset, options)) => {
            let outcome = state
                .uploads
                .write_chunk(&id, offset, body_stream(body), options)
                .await?;
            (outcome.record, outcome.range_hash)
        }
        None => (created.record, None),
    };

    let mut response_headers = progress_headers(&record)?;
    if record.bytes_written > 0 {
        response_headers.insert(
            header::RANGE,
            header_value(format!("bytes=0-{}", record.bytes_written - 1))?,
        );
    }
    if let Some(hash) = range_hash {
        response_headers.insert(headers::X_RANGE_HASH, header_value(hash)?);
    }
    if created.created {
        response_headers.insert(header::LOCATION, header_value(location(&record.id))?);
    }

    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, response_headers, Json(record)).into_response())
}

/// Download stored bytes
#[utoipa::path(
    get,
    path = "/files/{id}",
    tag = "files",
    params(
        ("id" = String, Path, description = "Upload id"),
        ("Range" = Option<String>, Header, description = "Single byte range, `bytes=a-b`")
    ),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 206, description = "Partial content", content_type = "application/octet-stream"),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 410, description = "Upload expired", body = ErrorResponse),
        (status = 416, description = "Range not satisfiable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request_headers), fields(upload_id = %id))]
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let record = state.uploads.get(&id).await?;
    let length = record.bytes_written;

    let range = match header_str(&request_headers, header::RANGE.as_str()) {
        Some(raw) => parse_range(raw, length)?,
        None => None,
    };
    let (status, start, end) = match range {
        Some(range) => (StatusCode::PARTIAL_CONTENT, range.start, range.end),
        None => (StatusCode::OK, 0, length),
    };

    tracing::debug!(upload_id = %id, start, end, "Streaming upload from storage");

    let body = if end > start {
        Body::from_stream(state.uploads.read(&record, start, end).await?)
    } else {
        Body::empty()
    };

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, header_value(&record.content_type)?)
        .header(header::CONTENT_LENGTH, end - start)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            header_value(attachment_disposition(&record.name))?,
        )
        .header(header::LAST_MODIFIED, header_value(http_date(record.updated_at))?);
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            header_value(format!("bytes {}-{}/{}", start, end - 1, length))?,
        );
    }

    let response = response
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))?;
    Ok(response)
}

/// Upload record as JSON
#[utoipa::path(
    get,
    path = "/files/{id}/metadata",
    tag = "files",
    params(("id" = String, Path, description = "Upload id")),
    responses(
        (status = 200, description = "Upload record", body = UploadRecord),
        (status = 404, description = "Upload not found", body = ErrorResponse),
        (status = 410, description = "Upload expired", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(upload_id = %id))]
pub async fn get_metadata(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<UploadRecord>, HttpAppError> {
    Ok(Json(state.uploads.get(&id).await?))
}

/// List live uploads, oldest first
#[utoipa::path(
    get,
    path = "/files",
    tag = "files",
    responses(
        (status = 200, description = "Uploads", body = ListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ListResponse>, HttpAppError> {
    let items = state.uploads.list().await?;
    Ok(Json(ListResponse { items }))
}

/// Headers-only view of an upload.
pub async fn head_upload(state: &AppState, id: &str) -> Result<Response, HttpAppError> {
    let record = state.uploads.get(id).await?;

    let mut response_headers = progress_headers(&record)?;
    response_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(record.size.unwrap_or(record.bytes_written)),
    );
    response_headers.insert(header::CONTENT_TYPE, header_value(&record.content_type)?);
    response_headers.insert(
        header::LAST_MODIFIED,
        header_value(http_date(record.updated_at))?,
    );
    Ok((StatusCode::OK, response_headers).into_response())
}

/// Delete up to 50 uploads
#[utoipa::path(
    delete,
    path = "/files",
    tag = "files",
    params(("ids" = Option<String>, Query, description = "Comma-separated upload ids")),
    request_body(content = BatchDeleteRequest, description = "Ids as `{\"ids\": [...]}` or a bare array, when no query is given"),
    responses(
        (status = 200, description = "Per-id results", body = BatchDeleteResponse),
        (status = 400, description = "No ids or too many ids", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BatchDeleteQuery>,
    body: Bytes,
) -> Result<Json<BatchDeleteResponse>, HttpAppError> {
    let ids: Vec<String> = match query.ids {
        Some(ids) => ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect(),
        None if body.is_empty() => Vec::new(),
        None => match serde_json::from_slice::<BatchDeleteBody>(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid batch delete body: {}", e)))?
        {
            BatchDeleteBody::Object(request) => request.ids,
            BatchDeleteBody::Ids(ids) => ids,
        },
    };

    let results = state.uploads.delete_batch(&ids).await?;
    tracing::info!(
        requested = ids.len(),
        deleted = results
            .iter()
            .filter(|r| r.status == BatchDeleteStatus::Deleted)
            .count(),
        "Batch delete finished"
    );
    Ok(Json(BatchDeleteResponse { results }))
}

/// Creation parameters of a raw-body request.
///
/// Name: `Content-Disposition` filename, else `X-File-Name`. Total size: the
/// `Content-Range` total, else `X-Upload-Content-Length`, else `Content-Length`.
fn raw_new_upload(
    id: Option<String>,
    request_headers: &HeaderMap,
    range: Option<ContentRange>,
) -> Result<NewUpload, AppError> {
    let original_name = header_str(request_headers, header::CONTENT_DISPOSITION.as_str())
        .and_then(disposition_filename)
        .or_else(|| header_str(request_headers, headers::X_FILE_NAME).map(str::to_string));

    let size = match range {
        Some(range) => range.total(),
        None => match header_u64(request_headers, headers::X_UPLOAD_CONTENT_LENGTH)? {
            Some(size) => Some(size),
            None => header_u64(request_headers, header::CONTENT_LENGTH.as_str())?,
        },
    };

    let metadata = match header_str(request_headers, headers::X_UPLOAD_METADATA) {
        Some(raw) => metadata_from_json(raw)?,
        None => BTreeMap::new(),
    };

    Ok(NewUpload {
        id,
        original_name,
        content_type: header_str(request_headers, header::CONTENT_TYPE.as_str())
            .map(str::to_string),
        size,
        metadata,
    })
}

/// Where (and whether) the request body is written.
fn plan_write(
    request_headers: &HeaderMap,
    range: Option<ContentRange>,
    record: &UploadRecord,
) -> Result<Option<(u64, WriteOptions)>, AppError> {
    let expected_prefix_hash =
        header_str(request_headers, headers::X_RANGE_HASH).map(str::to_string);
    let content_length = header_u64(request_headers, header::CONTENT_LENGTH.as_str())?;

    match range {
        Some(ContentRange::Query { .. }) => Ok(None),
        Some(ContentRange::Bytes { start, end, total }) => Ok(Some((
            start,
            WriteOptions {
                declared_size: total,
                content_length: content_length.or(Some(end - start + 1)),
                expected_prefix_hash,
                ..Default::default()
            },
        ))),
        // Nothing to write; an unknown size still has to be settled by a body.
        None if content_length == Some(0) && record.size.is_some() => Ok(None),
        None => Ok(Some((
            0,
            WriteOptions {
                content_length,
                expected_prefix_hash,
                final_chunk: true,
                ..Default::default()
            },
        ))),
    }
}

fn content_range(request_headers: &HeaderMap) -> Result<Option<ContentRange>, AppError> {
    header_str(request_headers, header::CONTENT_RANGE.as_str())
        .map(parse_content_range)
        .transpose()
}

/// JSON object to string metadata; non-string values keep their JSON text.
fn metadata_from_json(raw: &str) -> Result<BTreeMap<String, String>, AppError> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| AppError::BadRequest(format!("Metadata is not valid JSON: {}", e)))?;
    let serde_json::Value::Object(map) = value else {
        return Err(AppError::BadRequest(
            "Metadata must be a JSON object".to_string(),
        ));
    };
    Ok(map
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

fn created_response(record: &UploadRecord) -> Result<Response, HttpAppError> {
    let mut response_headers = progress_headers(record)?;
    response_headers.insert(header::LOCATION, header_value(location(&record.id))?);
    Ok((StatusCode::CREATED, response_headers, Json(record.clone())).into_response())
}

/// Best-effort removal of an upload whose first write failed.
async fn discard(state: &AppState, id: &str) {
    if let Err(e) = state.uploads.delete(id).await {
        tracing::warn!(upload_id = %id, error = %e, "Failed to remove upload after failed write");
    }
}
