//! Upload record storage
//!
//! Records are kept apart from the bytes so a HEAD or offset query never
//! touches the data object. Each record is one JSON side-car; the user
//! metadata map is flattened to a `key base64(value)` string inside it.

#[cfg(feature = "storage-local")]
mod local;
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
mod object;

#[cfg(feature = "storage-local")]
pub use local::LocalMetaStorage;
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
pub use object::ObjectMetaStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tusky_core::models::{decode_metadata, encode_metadata};
use tusky_core::{UploadRecord, UploadStatus};

use crate::traits::{StorageError, StorageResult};

#[async_trait]
pub trait MetaStorage: Send + Sync {
    /// Upsert the full record.
    async fn save(&self, id: &str, record: &UploadRecord) -> StorageResult<()>;

    /// Fetch a record. Missing and unparsable records are both `NotFound`.
    async fn get(&self, id: &str) -> StorageResult<UploadRecord>;

    /// Refresh the record's TTL / last access.
    async fn touch(&self, id: &str, record: &UploadRecord) -> StorageResult<()> {
        self.save(id, record).await
    }

    /// Remove a record. Missing records are not an error.
    async fn delete(&self, id: &str) -> StorageResult<()>;

    /// Every parsable record.
    async fn list(&self) -> StorageResult<Vec<UploadRecord>>;
}

/// On-disk shape of a record.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    id: String,
    name: String,
    original_name: String,
    size: Option<u64>,
    content_type: String,
    bytes_written: u64,
    status: UploadStatus,
    created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    updated_at: DateTime<Utc>,
    #[serde(default)]
    expired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: String,
    backend_ref: String,
}

pub(crate) fn encode_record(record: &UploadRecord) -> StorageResult<Vec<u8>> {
    let stored = StoredRecord {
        id: record.id.clone(),
        name: record.name.clone(),
        original_name: record.original_name.clone(),
        size: record.size,
        content_type: record.content_type.clone(),
        bytes_written: record.bytes_written,
        status: record.status,
        created_at: record.created_at,
        updated_at: record.updated_at,
        expired_at: record.expired_at,
        metadata: encode_metadata(&record.metadata),
        backend_ref: record.backend_ref.clone(),
    };
    serde_json::to_vec(&stored)
        .map_err(|e| StorageError::BackendError(format!("Failed to serialize record: {}", e)))
}

/// Parse a stored record. Any structural problem is reported as `NotFound`
/// (and logged); records are never partially repaired.
pub(crate) fn decode_record(id: &str, bytes: &[u8]) -> StorageResult<UploadRecord> {
    let parsed = serde_json::from_slice::<StoredRecord>(bytes)
        .map_err(|e| e.to_string())
        .and_then(|stored| {
            let metadata = decode_metadata(&stored.metadata).map_err(|e| e.to_string())?;
            if stored.id != id {
                return Err(format!("record id {} does not match key", stored.id));
            }
            Ok(UploadRecord {
                id: stored.id,
                name: stored.name,
                original_name: stored.original_name,
                size: stored.size,
                content_type: stored.content_type,
                bytes_written: stored.bytes_written,
                status: stored.status,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                expired_at: stored.expired_at,
                metadata,
                backend_ref: stored.backend_ref,
            })
        });

    parsed.map_err(|reason| {
        tracing::warn!(upload_id = %id, reason = %reason, "Corrupted upload record treated as missing");
        StorageError::NotFound(id.to_string())
    })
}

/// Ids become part of a key, so they must not carry separators.
pub(crate) fn check_id(id: &str) -> StorageResult<()> {
    if id.is_empty() || id.contains(['/', '\\', '\0']) || id.contains("..") {
        return Err(StorageError::InvalidKey(format!("Invalid upload id: {}", id)));
    }
    Ok(())
}
