use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::AppError;

/// Upload lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Created,
    Uploading,
    Completed,
    Expired,
    Deleted,
}

impl UploadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Expired | UploadStatus::Deleted
        )
    }

    /// Transitions only move forward. A completed upload can still be deleted;
    /// expired and deleted accept nothing.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        use UploadStatus::*;
        match (self, next) {
            (Created, Uploading | Completed | Expired | Deleted) => true,
            (Uploading, Uploading | Completed | Expired | Deleted) => true,
            (Completed, Deleted) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Created => "created",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Expired => "expired",
            UploadStatus::Deleted => "deleted",
        }
    }
}

/// The authoritative description of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadRecord {
    pub id: String,
    pub name: String,
    pub original_name: String,
    /// Declared total length; `null` while the length is deferred.
    pub size: Option<u64>,
    pub content_type: String,
    pub bytes_written: u64,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
    /// Backend handle; never exposed to clients.
    #[serde(skip)]
    pub backend_ref: String,
}

/// Parameters for creating an upload, produced by the protocol handlers.
#[derive(Debug, Clone, Default)]
pub struct NewUpload {
    pub id: Option<String>,
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    pub metadata: BTreeMap<String, String>,
}

impl UploadRecord {
    pub fn new(
        id: String,
        name: String,
        original_name: String,
        content_type: String,
        size: Option<u64>,
        metadata: BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            original_name,
            size,
            content_type,
            bytes_written: 0,
            status: UploadStatus::Created,
            created_at: now,
            updated_at: now,
            expired_at: ttl.map(|ttl| now + ttl),
            metadata,
            backend_ref: String::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == UploadStatus::Completed
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|deadline| now > deadline)
    }

    /// Bytes still accepted before the declared size is reached.
    pub fn remaining(&self) -> Option<u64> {
        self.size.map(|size| size.saturating_sub(self.bytes_written))
    }

    /// Fix a deferred length. A known length cannot change.
    pub fn declare_size(&mut self, size: u64) -> Result<(), AppError> {
        match self.size {
            Some(current) if current == size => Ok(()),
            Some(current) => Err(AppError::BadRequest(format!(
                "Upload length is already set to {}",
                current
            ))),
            None if size < self.bytes_written => Err(AppError::BadRequest(format!(
                "Upload length {} is smaller than the current offset {}",
                size, self.bytes_written
            ))),
            None => {
                self.size = Some(size);
                Ok(())
            }
        }
    }

    /// Record a durable write that moved the length to `new_length`.
    pub fn record_progress(&mut self, new_length: u64) -> Result<(), AppError> {
        if new_length < self.bytes_written {
            return Err(AppError::Internal(format!(
                "Upload {} length went backwards: {} -> {}",
                self.id, self.bytes_written, new_length
            )));
        }
        if let Some(size) = self.size {
            if new_length > size {
                return Err(AppError::PayloadTooLarge(format!(
                    "Upload {} exceeds its declared length {}",
                    self.id, size
                )));
            }
        }
        let next = if self.size == Some(new_length) {
            UploadStatus::Completed
        } else if new_length == self.bytes_written && self.status == UploadStatus::Created {
            UploadStatus::Created
        } else {
            UploadStatus::Uploading
        };
        self.transition(next)?;
        self.bytes_written = new_length;
        self.updated_at = Utc::now();
        if self.is_complete() {
            // Completed uploads are kept; only in-flight ones expire.
            self.expired_at = None;
        }
        Ok(())
    }

    pub fn transition(&mut self, next: UploadStatus) -> Result<(), AppError> {
        if self.status == next && !next.is_terminal() {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "Upload {} is {} and cannot become {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Slide the expiration deadline forward (TTL refresh on activity).
    pub fn touch(&mut self, ttl: Option<Duration>) {
        let now = Utc::now();
        self.updated_at = now;
        if let Some(ttl) = ttl {
            self.expired_at = Some(now + ttl);
        }
    }
}
