//! Application setup and initialization
//!
//! Everything `main` needs to go from a `Config` to a running router, kept
//! out of `main.rs` so integration tests can build the same app.

pub mod routes;
pub mod server;
pub mod storage;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tusky_core::{Config, LoggingUploadHook};

use crate::services::cleanup::CleanupService;
use crate::services::upload::UploadService;
use crate::state::AppState;

pub use routes::build_router;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    crate::telemetry::init_telemetry(config.log_format());

    validation::validate_config(&config).context("Configuration validation failed")?;
    tracing::info!("Configuration loaded and validated successfully");

    let handles = storage::setup_storage(&config).await?;

    let uploads = Arc::new(UploadService::new(
        &config,
        handles.storage,
        handles.meta,
        Arc::new(LoggingUploadHook),
    ));

    let mut state = AppState::new(config.clone(), uploads.clone());
    if config.cleanup_interval_secs() > 0 {
        let cleanup = Arc::new(CleanupService::new(
            uploads,
            Duration::from_secs(config.cleanup_interval_secs()),
        ));
        state = state.with_cleanup(cleanup.start().abort_handle());
        tracing::info!(
            interval_secs = config.cleanup_interval_secs(),
            "Expired upload cleanup task started"
        );
    }

    let state = Arc::new(state);
    let router = build_router(state.clone());

    Ok((state, router))
}
