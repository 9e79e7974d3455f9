//! Application state shared by all handlers.

use std::sync::Arc;
use tokio::task::AbortHandle;
use tusky_core::Config;

use crate::services::upload::UploadService;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub uploads: Arc<UploadService>,
    cleanup: Option<AbortHandle>,
}

impl AppState {
    pub fn new(config: Config, uploads: Arc<UploadService>) -> Self {
        Self {
            config,
            uploads,
            cleanup: None,
        }
    }

    pub fn with_cleanup(mut self, task: AbortHandle) -> Self {
        self.cleanup = Some(task);
        self
    }

    pub fn cleanup_task(&self) -> Option<&AbortHandle> {
        self.cleanup.as_ref()
    }

    /// Stop background work once the server has drained.
    pub fn shutdown(&self) {
        if let Some(task) = &self.cleanup {
            task.abort();
            tracing::info!("Cleanup task stopped");
        }
    }
}
