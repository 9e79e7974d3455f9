//! Object-store backends (S3, GCS).
//!
//! Object stores cannot append, so each chunk becomes its own part object
//! under the upload prefix and the logical file is the ordered concatenation
//! of its parts. A zero-length marker written by `create` makes an upload
//! with no bytes yet visible to `stat`.

use crate::keys;
use crate::traits::{ByteStream, ObjectStat, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{
    ObjectMeta, ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult, WriteMultipart,
};
use std::sync::Arc;
use tusky_core::UploadRecord;

#[cfg(feature = "storage-gcs")]
use object_store::gcp::GoogleCloudStorageBuilder;
#[cfg(feature = "storage-s3")]
use object_store::aws::AmazonS3Builder;

/// Part uploads allowed in flight while a chunk streams in.
const MAX_IN_FLIGHT_PARTS: usize = 4;

/// One stored chunk.
#[derive(Debug, Clone)]
struct Part {
    offset: u64,
    size: u64,
    location: Path,
    last_modified: DateTime<Utc>,
}

/// Storage over any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    backend: StorageBackend,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, backend: StorageBackend) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            backend,
        }
    }

    /// S3 or S3-compatible bucket
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - custom endpoint, e.g. "http://localhost:9000" for MinIO
    #[cfg(feature = "storage-s3")]
    pub fn s3(bucket: String, region: String, endpoint_url: Option<String>) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::new(Arc::new(store), bucket, StorageBackend::S3))
    }

    /// Google Cloud Storage bucket; credentials come from the standard
    /// `GOOGLE_*` environment variables.
    #[cfg(feature = "storage-gcs")]
    pub fn gcs(bucket: String) -> StorageResult<Self> {
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket.clone())
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::new(Arc::new(store), bucket, StorageBackend::Gcs))
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// All objects under the upload prefix: (marker present, parts sorted by offset).
    async fn list_parts(&self, backend_ref: &str) -> StorageResult<(bool, Vec<Part>)> {
        let prefix = Path::from(backend_ref.to_string());
        let objects: Vec<ObjectMeta> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| map_object_error(backend_ref, e))?;

        let mut marker = false;
        let mut parts = Vec::new();
        for object in objects {
            let Some(file_name) = object.location.filename() else {
                continue;
            };
            if file_name == keys::UPLOAD_MARKER {
                marker = true;
            } else if let Some(offset) = keys::part_offset(file_name) {
                parts.push(Part {
                    offset,
                    size: object.size as u64,
                    location: object.location.clone(),
                    last_modified: object.last_modified,
                });
            }
        }
        parts.sort_by_key(|p| p.offset);
        Ok((marker, parts))
    }

    /// Length of the contiguous run of parts starting at zero.
    fn contiguous_len(parts: &[Part]) -> u64 {
        let mut len = 0;
        for part in parts {
            if part.offset != len {
                break;
            }
            len += part.size;
        }
        len
    }
}

/// Stream the rest of a chunk into an open part upload. The part only becomes
/// visible once the caller finishes it.
async fn pump(
    writer: &mut WriteMultipart,
    data: &mut ByteStream<'_>,
    size: &mut u64,
    key: &str,
) -> StorageResult<()> {
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        writer
            .wait_for_capacity(MAX_IN_FLIGHT_PARTS)
            .await
            .map_err(|e| map_object_error(key, e))?;
        *size += chunk.len() as u64;
        writer.write(&chunk);
    }
    Ok(())
}

/// Map `object_store` failures onto the storage taxonomy.
fn map_object_error(key: &str, err: ObjectStoreError) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::AlreadyExists { .. } | ObjectStoreError::Precondition { .. } => {
            StorageError::BackendError(err.to_string())
        }
        ObjectStoreError::NotSupported { .. } => StorageError::ConfigError(err.to_string()),
        other => StorageError::BackendUnavailable(other.to_string()),
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn create(&self, record: &UploadRecord) -> StorageResult<String> {
        let key = keys::data_key(&record.id);
        let marker = Path::from(keys::marker_key(&key));

        match self.store.head(&marker).await {
            Ok(_) => return Ok(key),
            Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => return Err(map_object_error(&key, e)),
        }

        let result: ObjectResult<_> = self.store.put(&marker, PutPayload::from(Bytes::new())).await;
        result.map_err(|e| map_object_error(&key, e))?;

        tracing::debug!(bucket = %self.bucket, key = %key, "Object upload allocated");
        Ok(key)
    }

    async fn write(
        &self,
        backend_ref: &str,
        offset: u64,
        data: ByteStream<'_>,
    ) -> StorageResult<u64> {
        let start = std::time::Instant::now();
        let (marker, parts) = self.list_parts(backend_ref).await?;
        if !marker && parts.is_empty() {
            return Err(StorageError::NotFound(backend_ref.to_string()));
        }

        let current = Self::contiguous_len(&parts);
        if current != offset {
            return Err(StorageError::OffsetMismatch {
                expected: current,
                actual: offset,
            });
        }

        // an empty body leaves no part behind
        let mut data = data;
        let first = loop {
            match data.next().await {
                Some(chunk) => {
                    let chunk = chunk?;
                    if !chunk.is_empty() {
                        break chunk;
                    }
                }
                None => return Ok(offset),
            }
        };

        let location = Path::from(keys::part_key(backend_ref, offset));
        let upload = self
            .store
            .put_multipart(&location)
            .await
            .map_err(|e| map_object_error(backend_ref, e))?;
        let mut writer = WriteMultipart::new(upload);
        let mut size = first.len() as u64;
        writer.write(&first);

        if let Err(e) = pump(&mut writer, &mut data, &mut size, backend_ref).await {
            if let Err(abort) = writer.abort().await {
                tracing::warn!(error = %abort, key = %backend_ref, offset, "Failed to abort part upload");
            }
            return Err(e);
        }

        let result: ObjectResult<_> = writer.finish().await;
        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %backend_ref,
                offset = offset,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object part upload failed"
            );
            map_object_error(backend_ref, e)
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %backend_ref,
            offset = offset,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object part upload successful"
        );

        Ok(offset + size)
    }

    async fn read(
        &self,
        backend_ref: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream<'static>> {
        let (marker, parts) = self.list_parts(backend_ref).await?;
        if !marker && parts.is_empty() {
            return Err(StorageError::NotFound(backend_ref.to_string()));
        }
        let end = end.min(Self::contiguous_len(&parts));

        let selected: Vec<(Path, u64, u64)> = parts
            .into_iter()
            .filter(|p| p.offset < end && p.offset + p.size > start)
            .map(|p| {
                let local_start = start.saturating_sub(p.offset);
                let local_end = (end - p.offset).min(p.size);
                (p.location, local_start, local_end)
            })
            .collect();

        let store = self.store.clone();
        let key = backend_ref.to_string();
        let stream = futures::stream::iter(selected).then(move |(location, from, to)| {
            let store = store.clone();
            let key = key.clone();
            async move {
                let bytes = store
                    .get(&location)
                    .await
                    .map_err(|e| map_object_error(&key, e))?
                    .bytes()
                    .await
                    .map_err(|e| map_object_error(&key, e))?;
                let to = (to as usize).min(bytes.len());
                let from = (from as usize).min(to);
                Ok::<Bytes, StorageError>(bytes.slice(from..to))
            }
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, backend_ref: &str) -> StorageResult<()> {
        let prefix = Path::from(backend_ref.to_string());
        let objects: Vec<ObjectMeta> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(|e| map_object_error(backend_ref, e))?;

        for object in &objects {
            match self.store.delete(&object.location).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
                Err(e) => return Err(map_object_error(backend_ref, e)),
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %backend_ref,
            objects = objects.len(),
            "Object delete successful"
        );
        Ok(())
    }

    async fn stat(&self, backend_ref: &str) -> StorageResult<ObjectStat> {
        let (marker, parts) = self.list_parts(backend_ref).await?;
        if !marker && parts.is_empty() {
            return Err(StorageError::NotFound(backend_ref.to_string()));
        }
        Ok(ObjectStat {
            size: Self::contiguous_len(&parts),
            content_type: None,
            last_modified: parts.iter().map(|p| p.last_modified).max(),
        })
    }

    fn backend_type(&self) -> StorageBackend {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{collect_stream, single_chunk};
    use object_store::memory::InMemory;
    use std::collections::BTreeMap;

    fn storage() -> ObjectStorage {
        ObjectStorage::new(Arc::new(InMemory::new()), "test-bucket", StorageBackend::S3)
    }

    fn record(id: &str) -> UploadRecord {
        UploadRecord::new(
            id.to_string(),
            "clip.mp4".to_string(),
            "clip.mp4".to_string(),
            "video/mp4".to_string(),
            Some(10),
            BTreeMap::new(),
            None,
        )
    }

    #[tokio::test]
    async fn test_object_storage_parts_concatenate() {
        let storage = storage();
        let key = storage.create(&record("abc123")).await.unwrap();
        assert_eq!(storage.stat(&key).await.unwrap().size, 0);

        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"01234")))
            .await
            .unwrap();
        let len = storage
            .write(&key, 5, single_chunk(Bytes::from_static(b"56789")))
            .await
            .unwrap();
        assert_eq!(len, 10);

        let all = collect_stream(storage.read(&key, 0, u64::MAX).await.unwrap(), 100)
            .await
            .unwrap();
        assert_eq!(&all[..], b"0123456789");

        let middle = collect_stream(storage.read(&key, 3, 7).await.unwrap(), 100)
            .await
            .unwrap();
        assert_eq!(&middle[..], b"3456");
    }

    #[tokio::test]
    async fn test_object_storage_streams_large_chunk() {
        let storage = storage();
        let key = storage.create(&record("big")).await.unwrap();

        // Six 2 MiB frames, more than one multipart part.
        let frames: Vec<StorageResult<Bytes>> = (0u8..6)
            .map(|i| Ok(Bytes::from(vec![b'a' + i; 2 * 1024 * 1024])))
            .collect();
        let len = storage
            .write(&key, 0, Box::pin(futures::stream::iter(frames)))
            .await
            .unwrap();
        assert_eq!(len, 12 * 1024 * 1024);
        assert_eq!(storage.stat(&key).await.unwrap().size, len);

        let boundary = 2 * 1024 * 1024;
        let around = collect_stream(storage.read(&key, boundary - 2, boundary + 2).await.unwrap(), 16)
            .await
            .unwrap();
        assert_eq!(&around[..], b"aabb");
    }

    #[tokio::test]
    async fn test_object_storage_empty_body_writes_no_part() {
        let storage = storage();
        let key = storage.create(&record("empty")).await.unwrap();
        let len = storage
            .write(&key, 0, Box::pin(futures::stream::empty()))
            .await
            .unwrap();
        assert_eq!(len, 0);
        let (_, parts) = storage.list_parts(&key).await.unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_object_storage_rejects_offset_mismatch() {
        let storage = storage();
        let key = storage.create(&record("gap")).await.unwrap();
        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"abc")))
            .await
            .unwrap();

        let err = storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"abc")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::OffsetMismatch {
                expected: 3,
                actual: 0
            }
        ));
        assert_eq!(storage.stat(&key).await.unwrap().size, 3);
    }

    #[tokio::test]
    async fn test_object_storage_failed_stream_commits_nothing() {
        let storage = storage();
        let key = storage.create(&record("broken")).await.unwrap();
        let failing: ByteStream<'static> = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::StreamAborted("disconnect".into())),
        ]));
        assert!(storage.write(&key, 0, failing).await.is_err());
        assert_eq!(storage.stat(&key).await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_object_storage_delete_is_idempotent() {
        let storage = storage();
        let key = storage.create(&record("gone")).await.unwrap();
        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"bytes")))
            .await
            .unwrap();

        storage.delete(&key).await.unwrap();
        storage.delete(&key).await.unwrap();
        assert!(matches!(
            storage.stat(&key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_object_storage_missing_upload() {
        let storage = storage();
        assert!(matches!(
            storage
                .write("nope", 0, single_chunk(Bytes::from_static(b"x")))
                .await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.read("nope", 0, 10).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
