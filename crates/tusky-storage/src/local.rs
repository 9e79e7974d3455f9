use crate::keys;
use crate::traits::{ByteStream, ObjectStat, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tusky_core::UploadRecord;

/// Local filesystem storage: one append-only file per upload.
#[derive(Clone)]
pub struct DiskStorage {
    base_path: PathBuf,
}

impl DiskStorage {
    /// Create a new DiskStorage rooted at `base_path`, creating the directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(DiskStorage { base_path })
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    /// Convert a backend ref to a filesystem path, refusing anything that
    /// could leave the base directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains("..")
            || key.starts_with('/')
            || key.contains('\\')
            || key.contains('\0')
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key contains invalid characters: {}",
                key
            )));
        }

        let path = self.base_path.join(key);
        if path.parent() != Some(self.base_path.as_path()) {
            return Err(StorageError::InvalidKey(
                "Storage key resolves outside storage directory".to_string(),
            ));
        }
        Ok(path)
    }

    fn not_found_or_io(key: &str, err: std::io::Error) -> StorageError {
        if err.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::IoError(err)
        }
    }
}

#[async_trait]
impl Storage for DiskStorage {
    async fn create(&self, record: &UploadRecord) -> StorageResult<String> {
        let key = keys::data_key(&record.id);
        let path = self.key_to_path(&key)?;

        // create without truncate keeps a second call idempotent
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), key = %key, "Disk upload allocated");
        Ok(key)
    }

    async fn write(
        &self,
        backend_ref: &str,
        offset: u64,
        mut data: ByteStream<'_>,
    ) -> StorageResult<u64> {
        let start = std::time::Instant::now();
        let path = self.key_to_path(backend_ref)?;

        let mut file = OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| Self::not_found_or_io(backend_ref, e))?;

        let current = file.metadata().await?.len();
        if current != offset {
            return Err(StorageError::OffsetMismatch {
                expected: current,
                actual: offset,
            });
        }
        file.seek(SeekFrom::Start(offset)).await?;

        let mut written: u64 = 0;
        let result: StorageResult<()> = async {
            while let Some(chunk) = data.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_data().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            if let Err(truncate_err) = file.set_len(offset).await {
                tracing::error!(
                    error = %truncate_err,
                    key = %backend_ref,
                    offset = offset,
                    "Failed to roll back partial disk write"
                );
            }
            tracing::warn!(
                error = %e,
                key = %backend_ref,
                offset = offset,
                discarded_bytes = written,
                "Disk write aborted"
            );
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            key = %backend_ref,
            offset = offset,
            size_bytes = written,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Disk write successful"
        );

        Ok(offset + written)
    }

    async fn read(
        &self,
        backend_ref: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream<'static>> {
        let path = self.key_to_path(backend_ref)?;

        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found_or_io(backend_ref, e))?;
        let len = file.metadata().await?.len();
        let end = end.min(len);
        let start = start.min(end);

        file.seek(SeekFrom::Start(start)).await?;
        let stream = ReaderStream::new(file.take(end - start))
            .map(|chunk| chunk.map_err(StorageError::from));

        Ok(Box::pin(stream))
    }

    async fn delete(&self, backend_ref: &str) -> StorageResult<()> {
        let path = self.key_to_path(backend_ref)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), key = %backend_ref, "Disk delete successful");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(key = %backend_ref, "Disk delete: file already gone");
                Ok(())
            }
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn stat(&self, backend_ref: &str) -> StorageResult<ObjectStat> {
        let path = self.key_to_path(backend_ref)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(backend_ref, e))?;

        Ok(ObjectStat {
            size: metadata.len(),
            content_type: None,
            last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{collect_stream, single_chunk};
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(id: &str) -> UploadRecord {
        UploadRecord::new(
            id.to_string(),
            "test.bin".to_string(),
            "test.bin".to_string(),
            "application/octet-stream".to_string(),
            Some(11),
            BTreeMap::new(),
            None,
        )
    }

    async fn read_all(storage: &DiskStorage, key: &str) -> Vec<u8> {
        let stream = storage.read(key, 0, u64::MAX).await.unwrap();
        collect_stream(stream, u64::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_disk_storage_appends_in_order() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();

        let key = storage.create(&record("abc123")).await.unwrap();
        assert_eq!(key, "abc123");

        let len = storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"hello ")))
            .await
            .unwrap();
        assert_eq!(len, 6);
        let len = storage
            .write(&key, 6, single_chunk(Bytes::from_static(b"world")))
            .await
            .unwrap();
        assert_eq!(len, 11);

        assert_eq!(read_all(&storage, &key).await, b"hello world");
        assert_eq!(storage.stat(&key).await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_disk_storage_rejects_offset_mismatch() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        let key = storage.create(&record("gap")).await.unwrap();
        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"abc")))
            .await
            .unwrap();

        let err = storage
            .write(&key, 5, single_chunk(Bytes::from_static(b"zzz")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::OffsetMismatch {
                expected: 3,
                actual: 5
            }
        ));
        assert_eq!(read_all(&storage, &key).await, b"abc");
    }

    #[tokio::test]
    async fn test_disk_storage_rolls_back_failed_stream() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        let key = storage.create(&record("broken")).await.unwrap();

        let failing: ByteStream<'static> = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(StorageError::StreamAborted("client went away".into())),
        ]));
        assert!(storage.write(&key, 0, failing).await.is_err());
        assert_eq!(storage.stat(&key).await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_disk_storage_create_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        let rec = record("twice");
        let key = storage.create(&rec).await.unwrap();
        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"keep")))
            .await
            .unwrap();

        assert_eq!(storage.create(&rec).await.unwrap(), key);
        assert_eq!(read_all(&storage, &key).await, b"keep");
    }

    #[tokio::test]
    async fn test_disk_storage_range_read_and_delete() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        let key = storage.create(&record("ranged")).await.unwrap();
        storage
            .write(&key, 0, single_chunk(Bytes::from_static(b"0123456789")))
            .await
            .unwrap();

        let stream = storage.read(&key, 2, 5).await.unwrap();
        assert_eq!(&collect_stream(stream, 100).await.unwrap()[..], b"234");

        storage.delete(&key).await.unwrap();
        storage.delete(&key).await.unwrap();
        assert!(matches!(
            storage.stat(&key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disk_storage_rejects_traversal_keys() {
        let dir = tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        assert!(matches!(
            storage.stat("../etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.delete("nested/key").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
