//! Post-upload hooks
//!
//! Integrations (media processing, notifications, indexing) plug in here
//! without the engine depending on them. Hooks run after the state change is
//! persisted; a failing hook is logged and never fails the request.

use async_trait::async_trait;

use crate::models::UploadRecord;

#[async_trait]
pub trait UploadHook: Send + Sync {
    /// Called once when an upload reaches `completed`.
    async fn on_complete(&self, record: &UploadRecord) -> Result<(), String>;

    /// Called after an upload has been deleted or swept as expired.
    async fn on_delete(&self, record: &UploadRecord) -> Result<(), String>;
}

/// No-op implementation for when no integration is configured
pub struct NoOpUploadHook;

#[async_trait]
impl UploadHook for NoOpUploadHook {
    async fn on_complete(&self, _record: &UploadRecord) -> Result<(), String> {
        Ok(())
    }

    async fn on_delete(&self, _record: &UploadRecord) -> Result<(), String> {
        Ok(())
    }
}

/// Emits one structured log line per lifecycle event.
pub struct LoggingUploadHook;

#[async_trait]
impl UploadHook for LoggingUploadHook {
    async fn on_complete(&self, record: &UploadRecord) -> Result<(), String> {
        tracing::info!(
            upload_id = %record.id,
            name = %record.name,
            content_type = %record.content_type,
            size_bytes = record.bytes_written,
            "Upload completed"
        );
        Ok(())
    }

    async fn on_delete(&self, record: &UploadRecord) -> Result<(), String> {
        tracing::info!(
            upload_id = %record.id,
            status = record.status.as_str(),
            bytes_written = record.bytes_written,
            "Upload removed"
        );
        Ok(())
    }
}
