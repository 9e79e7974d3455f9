//! Storage abstraction traits
//!
//! Every byte backend implements [`Storage`]; handlers and the upload service
//! only ever see `Arc<dyn Storage>`.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;
use tusky_core::{AppError, UploadRecord};

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Network or authentication failure talking to the backend
    #[error("Storage backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Offset mismatch: backend holds {expected} bytes, write started at {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// The incoming byte stream failed (client disconnect, size cap hit)
    #[error("Upload stream aborted: {0}")]
    StreamAborted(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::BackendUnavailable(_) => true,
            StorageError::IoError(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => AppError::NotFound(format!("Upload not found: {}", what)),
            StorageError::OffsetMismatch { expected, actual } => AppError::Conflict(format!(
                "Upload-Offset {} does not match current offset {}",
                actual, expected
            )),
            StorageError::QuotaExceeded(msg) => AppError::InsufficientStorage(msg),
            StorageError::BackendUnavailable(msg) => AppError::StorageUnavailable(msg),
            StorageError::InvalidKey(msg) => AppError::InvalidInput(msg),
            StorageError::StreamAborted(msg) => AppError::BadRequest(msg),
            other => AppError::Storage(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A stream of byte chunks flowing into or out of a backend.
pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send + 'a>>;

/// Lightweight metadata probe result
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectStat {
    pub size: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Byte storage for uploads
///
/// All methods take the backend ref returned by [`Storage::create`].
#[async_trait]
pub trait Storage: Send + Sync {
    /// Allocate storage for a new upload and return its backend ref.
    ///
    /// Idempotent: a second call for the same id returns the same ref and
    /// keeps existing bytes.
    async fn create(&self, record: &UploadRecord) -> StorageResult<String>;

    /// Append `data` at `offset` and return the new total length.
    ///
    /// Fails with `OffsetMismatch`, without touching stored bytes, when
    /// `offset` is not the current length. A failing stream leaves the
    /// stored length at `offset`.
    async fn write(&self, backend_ref: &str, offset: u64, data: ByteStream<'_>)
        -> StorageResult<u64>;

    /// Stream bytes `[start, end)`, clipped to the stored length.
    async fn read(&self, backend_ref: &str, start: u64, end: u64)
        -> StorageResult<ByteStream<'static>>;

    /// Remove the backing object. Deleting a missing object succeeds.
    async fn delete(&self, backend_ref: &str) -> StorageResult<()>;

    async fn stat(&self, backend_ref: &str) -> StorageResult<ObjectStat>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

/// Wrap one buffer as a [`ByteStream`].
pub fn single_chunk(bytes: Bytes) -> ByteStream<'static> {
    Box::pin(futures::stream::once(async move { Ok(bytes) }))
}

/// Drain a stream into one buffer, failing once it grows past `limit` bytes.
pub async fn collect_stream(mut stream: ByteStream<'_>, limit: u64) -> StorageResult<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buffer.len() as u64 + chunk.len() as u64 > limit {
            return Err(StorageError::StreamAborted(format!(
                "body exceeds {} bytes",
                limit
            )));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}
