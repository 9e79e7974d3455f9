//! Storage setup and initialization

use anyhow::{Context, Result};
use tusky_core::Config;
use tusky_storage::{create_storage, StorageHandles};

/// Build the byte store and the record store for the configured backend.
pub async fn setup_storage(config: &Config) -> Result<StorageHandles> {
    tracing::info!(backend = %config.storage_backend(), "Initializing storage...");
    let handles = create_storage(config)
        .await
        .context("Failed to initialize storage")?;
    tracing::info!(
        backend = ?handles.storage.backend_type(),
        "Storage initialized successfully"
    );
    Ok(handles)
}
