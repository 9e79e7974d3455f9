use serde::Serialize;
use tusky_core::{ChecksumAlgorithm, UploadRecord};
use utoipa::ToSchema;

/// Client-declared digest of a single chunk (`Upload-Checksum`).
#[derive(Debug, Clone)]
pub struct ChunkChecksum {
    pub algorithm: ChecksumAlgorithm,
    /// Base64 digest as sent by the client
    pub expected: String,
}

/// Per-request knobs for [`super::UploadService::write_chunk`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Total length learnt with this request (deferred length, `Content-Range` total).
    pub declared_size: Option<u64>,
    /// Body length announced by the client, checked before streaming.
    pub content_length: Option<u64>,
    /// Verify the whole chunk before it reaches the backend.
    pub checksum: Option<ChunkChecksum>,
    /// Expected hash of `[0, offset)`, hex or base64.
    pub expected_prefix_hash: Option<String>,
    /// The body ends the upload; an unknown size becomes the written length.
    pub final_chunk: bool,
}

/// Result of one accepted write.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub record: UploadRecord,
    /// Hex digest of `[0, bytesWritten)`; absent when nothing was written
    /// to an already completed upload.
    pub range_hash: Option<String>,
}

/// Result of an explicit-id create.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub record: UploadRecord,
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchDeleteStatus {
    Deleted,
    NotFound,
    Error,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchDeleteResult {
    pub id: String,
    pub status: BatchDeleteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
