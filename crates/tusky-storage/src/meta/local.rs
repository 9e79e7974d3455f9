use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tusky_core::UploadRecord;
use uuid::Uuid;

use super::{check_id, decode_record, encode_record, MetaStorage};
use crate::keys;
use crate::traits::{StorageError, StorageResult};

/// Side-car records on the local filesystem: `<directory>/<prefix><id><suffix>`.
#[derive(Clone)]
pub struct LocalMetaStorage {
    directory: PathBuf,
    prefix: String,
    suffix: String,
}

impl LocalMetaStorage {
    pub async fn new(
        directory: impl Into<PathBuf>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> StorageResult<Self> {
        let directory = directory.into();
        let prefix = prefix.into();
        if prefix.contains("..") || prefix.starts_with('/') {
            return Err(StorageError::ConfigError(format!(
                "Invalid metadata prefix: {}",
                prefix
            )));
        }

        let storage = Self {
            directory,
            prefix,
            suffix: suffix.into(),
        };
        fs::create_dir_all(storage.listing_dir()).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create metadata directory {}: {}",
                storage.directory.display(),
                e
            ))
        })?;
        Ok(storage)
    }

    fn record_path(&self, id: &str) -> StorageResult<PathBuf> {
        check_id(id)?;
        Ok(self
            .directory
            .join(keys::meta_key(&self.prefix, id, &self.suffix)))
    }

    /// Directory holding the side-cars (the prefix may contain a sub-directory).
    fn listing_dir(&self) -> PathBuf {
        match self.prefix.rsplit_once('/') {
            Some((dir, _)) => self.directory.join(dir),
            None => self.directory.clone(),
        }
    }

    fn file_prefix(&self) -> &str {
        match self.prefix.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.prefix,
        }
    }
}

#[async_trait]
impl MetaStorage for LocalMetaStorage {
    async fn save(&self, id: &str, record: &UploadRecord) -> StorageResult<()> {
        let path = self.record_path(id)?;
        let bytes = encode_record(record)?;

        // write-then-rename so readers never observe a half-written record
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&tmp, &bytes).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::IoError(e));
        }

        tracing::debug!(
            upload_id = %id,
            path = %path.display(),
            bytes_written = record.bytes_written,
            status = record.status.as_str(),
            "Upload record saved"
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<UploadRecord> {
        let path = self.record_path(id)?;
        match fs::read(&path).await {
            Ok(bytes) => decode_record(id, &bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(id.to_string())),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let path = self.record_path(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    async fn list(&self) -> StorageResult<Vec<UploadRecord>> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(self.listing_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(StorageError::IoError(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(id) = keys::id_from_meta_key(name, self.file_prefix(), &self.suffix) else {
                continue;
            };
            if check_id(id).is_err() {
                continue;
            }
            match self.get(id).await {
                Ok(record) => records.push(record),
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(id: &str) -> UploadRecord {
        let mut metadata = BTreeMap::new();
        metadata.insert("owner".to_string(), "alice".to_string());
        let mut record = UploadRecord::new(
            id.to_string(),
            "a.txt".to_string(),
            "a.txt".to_string(),
            "text/plain".to_string(),
            Some(5),
            metadata,
            None,
        );
        record.backend_ref = id.to_string();
        record
    }

    #[tokio::test]
    async fn test_local_meta_save_get_delete() {
        let dir = tempdir().unwrap();
        let meta = LocalMetaStorage::new(dir.path(), "", ".META").await.unwrap();

        let rec = record("abc123");
        meta.save("abc123", &rec).await.unwrap();
        assert!(dir.path().join("abc123.META").exists());
        assert_eq!(meta.get("abc123").await.unwrap(), rec);

        meta.delete("abc123").await.unwrap();
        meta.delete("abc123").await.unwrap();
        assert!(matches!(
            meta.get("abc123").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_local_meta_corrupted_record_is_not_found() {
        let dir = tempdir().unwrap();
        let meta = LocalMetaStorage::new(dir.path(), "", ".META").await.unwrap();
        std::fs::write(dir.path().join("broken.META"), b"{\"id\": 12").unwrap();

        assert!(matches!(
            meta.get("broken").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(meta.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_meta_list_with_prefix_directory() {
        let dir = tempdir().unwrap();
        let meta = LocalMetaStorage::new(dir.path(), "meta/up-", ".json")
            .await
            .unwrap();
        meta.save("one", &record("one")).await.unwrap();
        meta.save("two", &record("two")).await.unwrap();
        // data files sharing the directory are ignored
        std::fs::write(dir.path().join("meta").join("stray.bin"), b"x").unwrap();

        let mut ids: Vec<String> = meta.list().await.unwrap().into_iter().map(|r| r.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["one".to_string(), "two".to_string()]);
        assert!(dir.path().join("meta").join("up-one.json").exists());
    }

    #[tokio::test]
    async fn test_local_meta_touch_overwrites() {
        let dir = tempdir().unwrap();
        let meta = LocalMetaStorage::new(dir.path(), "", ".META").await.unwrap();
        let mut rec = record("t");
        meta.save("t", &rec).await.unwrap();
        rec.bytes_written = 3;
        meta.touch("t", &rec).await.unwrap();
        assert_eq!(meta.get("t").await.unwrap().bytes_written, 3);
    }
}
