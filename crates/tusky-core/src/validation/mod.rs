//! Request validation shared by both upload protocols.
//!
//! Everything here runs before a single byte reaches a backend.

mod mime;
mod name;

pub use mime::{mime_allowed, mime_matches, normalize_mime_type};
pub use name::{sanitize_name, validate_name, validate_upload_id};

use chrono::{DateTime, Utc};

use crate::models::UploadRecord;
use crate::AppError;

/// Validation failures for an upload request
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Unsupported content type: {content_type} (allowed: {allowed:?})")]
    InvalidContentType {
        content_type: String,
        allowed: Vec<String>,
    },

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Invalid upload id: {0}")]
    InvalidId(String),

    #[error("Upload {id} expired at {expired_at}")]
    Expired {
        id: String,
        expired_at: DateTime<Utc>,
    },
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::FileTooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            ValidationError::InvalidContentType { .. } => {
                AppError::UnsupportedMediaType(err.to_string())
            }
            ValidationError::InvalidName(_) | ValidationError::InvalidId(_) => {
                AppError::InvalidInput(err.to_string())
            }
            ValidationError::Expired { .. } => AppError::Gone(err.to_string()),
        }
    }
}

/// Upload validator
///
/// Holds the configured limits so handlers only pass what the client declared.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    max_upload_size: u64,
    allowed_mime: Vec<String>,
}

impl UploadValidator {
    pub fn new(max_upload_size: u64, allowed_mime: Vec<String>) -> Self {
        Self {
            max_upload_size,
            allowed_mime: allowed_mime
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    pub fn allowed_mime(&self) -> &[String] {
        &self.allowed_mime
    }

    /// Validate a declared or observed size
    pub fn validate_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.max_upload_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_upload_size,
            });
        }
        Ok(())
    }

    /// Validate content type against the allowlist
    pub fn validate_content_type(&self, content_type: &str) -> Result<(), ValidationError> {
        if !mime_allowed(&self.allowed_mime, content_type) {
            return Err(ValidationError::InvalidContentType {
                content_type: content_type.to_string(),
                allowed: self.allowed_mime.clone(),
            });
        }
        Ok(())
    }

    /// Validate name, type and (when known) size of a new upload
    pub fn validate_all(
        &self,
        name: &str,
        content_type: &str,
        size: Option<u64>,
    ) -> Result<(), ValidationError> {
        validate_name(name)?;
        self.validate_content_type(content_type)?;
        if let Some(size) = size {
            self.validate_size(size)?;
        }
        Ok(())
    }
}

/// Fails with `Expired` once `now` is past the record's deadline.
pub fn check_if_expired(record: &UploadRecord, now: DateTime<Utc>) -> Result<(), ValidationError> {
    match record.expired_at {
        Some(expired_at) if now > expired_at => Err(ValidationError::Expired {
            id: record.id.clone(),
            expired_at,
        }),
        _ => Ok(()),
    }
}
