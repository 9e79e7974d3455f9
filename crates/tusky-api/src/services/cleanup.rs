//! Periodic sweep of expired uploads.
//!
//! Expired uploads are always swept lazily when touched; this task also
//! reclaims the ones nobody asks about again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use super::upload::UploadService;

pub struct CleanupService {
    uploads: Arc<UploadService>,
    every: Duration,
}

impl CleanupService {
    pub fn new(uploads: Arc<UploadService>, every: Duration) -> Self {
        Self { uploads, every }
    }

    /// Start the background cleanup task. Abort the returned handle to stop it.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut cleanup_interval = interval(self.every);
            // The first tick fires immediately; skip it so startup stays quiet.
            cleanup_interval.tick().await;

            loop {
                cleanup_interval.tick().await;
                self.run_once().await;
            }
        })
    }

    #[tracing::instrument(skip(self), fields(cleanup.operation = "expire_uploads"))]
    pub async fn run_once(&self) -> usize {
        match self.uploads.purge_expired().await {
            Ok(0) => {
                tracing::debug!("No expired uploads");
                0
            }
            Ok(count) => {
                tracing::info!(count, "Expired uploads removed");
                count
            }
            Err(e) => {
                tracing::error!(error = %e, "Cleanup task failed");
                0
            }
        }
    }
}
