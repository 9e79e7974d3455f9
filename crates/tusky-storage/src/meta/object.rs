use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectMeta, ObjectStore, ObjectStoreExt, PutPayload};
use std::sync::Arc;
use tusky_core::UploadRecord;

use super::{check_id, decode_record, encode_record, MetaStorage};
use crate::keys;
use crate::traits::{StorageError, StorageResult};

/// Side-car records as objects in the upload bucket (S3, GCS).
#[derive(Clone)]
pub struct ObjectMetaStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    suffix: String,
}

impl ObjectMetaStorage {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            suffix: suffix.into(),
        }
    }

    fn location(&self, id: &str) -> StorageResult<Path> {
        check_id(id)?;
        Ok(Path::from(keys::meta_key(&self.prefix, id, &self.suffix)))
    }

    fn map_error(id: &str, err: ObjectStoreError) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(id.to_string()),
            other => StorageError::BackendUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl MetaStorage for ObjectMetaStorage {
    async fn save(&self, id: &str, record: &UploadRecord) -> StorageResult<()> {
        let location = self.location(id)?;
        let bytes = Bytes::from(encode_record(record)?);
        self.store
            .put(&location, PutPayload::from(bytes))
            .await
            .map_err(|e| Self::map_error(id, e))?;

        tracing::debug!(
            upload_id = %id,
            key = %location,
            bytes_written = record.bytes_written,
            status = record.status.as_str(),
            "Upload record saved"
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<UploadRecord> {
        let location = self.location(id)?;
        let bytes = self
            .store
            .get(&location)
            .await
            .map_err(|e| Self::map_error(id, e))?
            .bytes()
            .await
            .map_err(|e| Self::map_error(id, e))?;
        decode_record(id, &bytes)
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        let location = self.location(id)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(Self::map_error(id, e)),
        }
    }

    async fn list(&self) -> StorageResult<Vec<UploadRecord>> {
        let listing_prefix = self
            .prefix
            .rsplit_once('/')
            .map(|(dir, _)| Path::from(dir.to_string()));
        let objects: Vec<ObjectMeta> = self
            .store
            .list(listing_prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| StorageError::BackendUnavailable(e.to_string()))?;

        let mut records = Vec::new();
        for object in objects {
            let key = object.location.to_string();
            let Some(id) = keys::id_from_meta_key(&key, &self.prefix, &self.suffix) else {
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
