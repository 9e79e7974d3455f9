#[cfg(feature = "storage-local")]
use crate::{DiskStorage, LocalMetaStorage};
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
use crate::{ObjectMetaStorage, ObjectStorage};
use crate::{MetaStorage, Storage, StorageBackend, StorageError, StorageResult};
use std::sync::Arc;
use tusky_core::Config;

const DEFAULT_S3_REGION: &str = "us-east-1";

/// Data storage and record storage built for the same backend.
#[derive(Clone)]
pub struct StorageHandles {
    pub storage: Arc<dyn Storage>,
    pub meta: Arc<dyn MetaStorage>,
}

/// Create the storage pair based on configuration
pub async fn create_storage(config: &Config) -> StorageResult<StorageHandles> {
    match config.storage_backend() {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let bucket = config
                .s3_bucket()
                .map(String::from)
                .ok_or_else(|| StorageError::ConfigError("S3_BUCKET not configured".to_string()))?;
            let region = config
                .s3_region()
                .or_else(|| config.aws_region())
                .unwrap_or(DEFAULT_S3_REGION)
                .to_string();
            let endpoint = config.s3_endpoint().map(String::from);

            let storage = ObjectStorage::s3(bucket, region, endpoint)?;
            let meta = ObjectMetaStorage::new(storage.store(), config.meta_prefix(), config.meta_suffix());
            tracing::info!(bucket = storage.bucket(), "Using S3 storage backend");
            Ok(StorageHandles {
                storage: Arc::new(storage),
                meta: Arc::new(meta),
            })
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-gcs")]
        StorageBackend::Gcs => {
            let bucket = config
                .gcs_bucket()
                .map(String::from)
                .ok_or_else(|| StorageError::ConfigError("GCS_BUCKET not configured".to_string()))?;

            let storage = ObjectStorage::gcs(bucket)?;
            let meta = ObjectMetaStorage::new(storage.store(), config.meta_prefix(), config.meta_suffix());
            tracing::info!(bucket = storage.bucket(), "Using GCS storage backend");
            Ok(StorageHandles {
                storage: Arc::new(storage),
                meta: Arc::new(meta),
            })
        }

        #[cfg(not(feature = "storage-gcs"))]
        StorageBackend::Gcs => Err(StorageError::ConfigError(
            "GCS storage backend not available (storage-gcs feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let storage = DiskStorage::new(config.directory()).await?;
            let meta = LocalMetaStorage::new(
                config.meta_directory(),
                config.meta_prefix(),
                config.meta_suffix(),
            )
            .await?;
            tracing::info!(directory = config.directory(), "Using local storage backend");
            Ok(StorageHandles {
                storage: Arc::new(storage),
                meta: Arc::new(meta),
            })
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
