//! HTTP handlers
//!
//! `files` owns the routes and dispatches to the multipart/raw flavor or the
//! TUS flavor depending on `Tus-Resumable`.

pub mod files;
pub mod health;
pub mod multipart;
pub mod tus;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue};
use futures::StreamExt;
use tusky_core::{AppError, UploadRecord};
use tusky_storage::{ByteStream, StorageError};

use crate::constants::{headers, FILES_PATH};
use crate::utils::headers::http_date;

/// Request body as a storage stream; transport failures abort the write.
pub(crate) fn body_stream(body: Body) -> ByteStream<'static> {
    Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(|e| StorageError::StreamAborted(e.to_string()))),
    )
}

pub(crate) fn location(id: &str) -> String {
    format!("{}/{}", FILES_PATH, id)
}

pub(crate) fn is_tus_request(request_headers: &HeaderMap) -> bool {
    request_headers.contains_key(headers::TUS_RESUMABLE)
}

pub(crate) fn header_value(value: impl AsRef<str>) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value.as_ref())
        .map_err(|e| AppError::Internal(format!("Invalid header value: {}", e)))
}

/// `Upload-Offset`, plus `Upload-Expires` while a deadline applies.
pub(crate) fn progress_headers(record: &UploadRecord) -> Result<HeaderMap, AppError> {
    let mut map = HeaderMap::new();
    map.insert(
        headers::UPLOAD_OFFSET,
        HeaderValue::from(record.bytes_written),
    );
    if let Some(expires) = record.expired_at {
        map.insert(headers::UPLOAD_EXPIRES, header_value(http_date(expires))?);
    }
    Ok(map)
}
