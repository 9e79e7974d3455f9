//! Upload service
//!
//! The one place that mutates uploads. It owns the data store, the record
//! store and the range hasher, and keeps them consistent:
//! create → write* → complete, delete, and the lazy expiration sweep.
//!
//! Bytes always land in the backend before the record is saved. A record that
//! under-reports is reconciled against the backend length on the next write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tusky_core::models::NewUpload;
use tusky_core::validation::{
    check_if_expired, normalize_mime_type, sanitize_name, validate_upload_id, UploadValidator,
};
use tusky_core::{
    AppError, ChecksumAlgorithm, Config, ErrorMetadata, StorageBackend, UploadHook, UploadRecord,
    UploadStatus,
};
use tusky_storage::checksum::digest_bytes;
use tusky_storage::keys::generate_upload_id;
use tusky_storage::{
    collect_stream, retry_transient, single_chunk, ByteStream, DigestEncoding, HashState,
    MetaStorage, RangeHasher, RetryPolicy, Storage, StorageError,
};

use super::locks::{SlotHandle, UploadLocks};
use super::types::{
    BatchDeleteResult, BatchDeleteStatus, ChunkChecksum, CreateOutcome, WriteOptions, WriteOutcome,
};
use crate::constants::MAX_BATCH_DELETE;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub struct UploadService {
    storage: Arc<dyn Storage>,
    meta: Arc<dyn MetaStorage>,
    hasher: RangeHasher,
    validator: UploadValidator,
    locks: UploadLocks,
    hook: Arc<dyn UploadHook>,
    retry: RetryPolicy,
    ttl: Option<chrono::Duration>,
    chunk_order_wait: Duration,
}

impl UploadService {
    pub fn new(
        config: &Config,
        storage: Arc<dyn Storage>,
        meta: Arc<dyn MetaStorage>,
        hook: Arc<dyn UploadHook>,
    ) -> Self {
        Self {
            storage,
            meta,
            hasher: RangeHasher::new(
                config.checksum_algorithm(),
                config.hash_cache_capacity(),
                config.hash_cache_ttl(),
            ),
            validator: UploadValidator::new(config.max_upload_size(), config.allow_mime().to_vec()),
            locks: UploadLocks::new(),
            hook,
            retry: RetryPolicy::default(),
            ttl: config.ttl().and_then(|ttl| match chrono::Duration::from_std(ttl) {
                Ok(ttl) => Some(ttl),
                Err(e) => {
                    tracing::warn!(error = %e, "Upload TTL out of range, uploads will not expire");
                    None
                }
            }),
            chunk_order_wait: config.chunk_order_wait(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_upload_size(&self) -> u64 {
        self.validator.max_upload_size()
    }

    pub fn checksum_algorithm(&self) -> ChecksumAlgorithm {
        self.hasher.algorithm()
    }

    pub fn backend_type(&self) -> StorageBackend {
        self.storage.backend_type()
    }

    /// Round trip to the record store; a missing record counts as reachable.
    pub async fn probe(&self) -> Result<(), AppError> {
        match self.meta.get("health-probe").await {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Create an upload with a fresh (or client-chosen, unused) id.
    #[tracing::instrument(skip(self, new))]
    pub async fn create(&self, new: NewUpload) -> Result<UploadRecord, AppError> {
        let record = self.prepare(new)?;
        let handle = self.locks.acquire(&record.id);
        let _guard = handle.slot().write.lock().await;

        match self.meta.get(&record.id).await {
            Ok(_) => {
                return Err(AppError::Conflict(format!(
                    "Upload {} already exists",
                    record.id
                )))
            }
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.persist_new(record).await
    }

    /// Create the upload unless the id is already taken, in which case the
    /// existing record is returned. Creation checks only apply to new uploads;
    /// a later chunk's headers say nothing about the file.
    #[tracing::instrument(skip(self, new))]
    pub async fn create_or_get(&self, new: NewUpload) -> Result<CreateOutcome, AppError> {
        let Some(id) = new.id.clone() else {
            let record = self.create(new).await?;
            return Ok(CreateOutcome {
                record,
                created: true,
            });
        };
        validate_upload_id(&id)?;
        let handle = self.locks.acquire(&id);
        let _guard = handle.slot().write.lock().await;

        match self.load(&id).await {
            Ok(existing) => {
                return Ok(CreateOutcome {
                    record: existing,
                    created: false,
                })
            }
            Err(AppError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let record = self.persist_new(self.prepare(new)?).await?;
        Ok(CreateOutcome {
            record,
            created: true,
        })
    }

    /// The current record. An expired in-flight upload is swept on sight:
    /// this call answers `Gone`, later calls `NotFound`.
    pub async fn get(&self, id: &str) -> Result<UploadRecord, AppError> {
        validate_upload_id(id)?;
        let record = self.fetch(id).await?;
        if !is_sweepable(&record) {
            return Ok(record);
        }
        let handle = self.locks.acquire(id);
        let _guard = handle.slot().write.lock().await;
        self.load(id).await
    }

    /// Like [`get`](Self::get), but first adopts bytes the backend holds
    /// beyond what the record reports.
    pub async fn current(&self, id: &str) -> Result<UploadRecord, AppError> {
        validate_upload_id(id)?;
        let handle = self.locks.acquire(id);
        let _guard = handle.slot().write.lock().await;
        let mut record = self.load(id).await?;
        self.reconcile(&mut record).await?;
        Ok(record)
    }

    /// Stream `[start, end)` of the stored bytes.
    pub async fn read(
        &self,
        record: &UploadRecord,
        start: u64,
        end: u64,
    ) -> Result<ByteStream<'static>, AppError> {
        Ok(self.storage.read(&record.backend_ref, start, end).await?)
    }

    /// Append `body` at `offset`.
    ///
    /// Writes to one id are serialized. A chunk whose offset is ahead of the
    /// stored length waits for its predecessor up to the configured budget; a
    /// stale offset is rejected at once. Nothing is recorded unless the backend
    /// confirmed the bytes.
    #[tracing::instrument(skip_all, fields(upload_id = %id, offset = offset))]
    pub async fn write_chunk(
        &self,
        id: &str,
        offset: u64,
        body: ByteStream<'_>,
        options: WriteOptions,
    ) -> Result<WriteOutcome, AppError> {
        validate_upload_id(id)?;
        let handle = self.locks.acquire(id);
        let result = self.write_in_slot(&handle, id, offset, body, options).await;
        handle.notify_progress();

        let (outcome, completed_now) = result?;
        if completed_now {
            self.fire_complete_hook(outcome.record.clone());
        }
        Ok(outcome)
    }

    async fn write_in_slot(
        &self,
        handle: &SlotHandle<'_>,
        id: &str,
        offset: u64,
        body: ByteStream<'_>,
        options: WriteOptions,
    ) -> Result<(WriteOutcome, bool), AppError> {
        let deadline = tokio::time::Instant::now() + self.chunk_order_wait;

        let (_guard, mut record) = loop {
            let guard = handle.slot().write.lock().await;
            let mut record = self.load(id).await?;
            self.reconcile(&mut record).await?;

            if offset == record.bytes_written {
                break (guard, record);
            }
            if offset < record.bytes_written || record.is_complete() {
                return Err(offset_conflict(offset, record.bytes_written));
            }

            tracing::debug!(
                upload_id = %id,
                offset,
                current_offset = record.bytes_written,
                "Chunk ahead of current offset, waiting for predecessor"
            );
            let notified = handle.slot().progressed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            drop(guard);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(offset_conflict(offset, record.bytes_written));
            }
        };

        if record.is_complete() {
            let mut body = body;
            if options.content_length.unwrap_or(0) > 0 || has_data(&mut body).await? {
                return Err(AppError::PayloadTooLarge(format!(
                    "Upload {} is already complete",
                    id
                )));
            }
            return Ok((
                WriteOutcome {
                    record,
                    range_hash: None,
                },
                false,
            ));
        }

        if let Some(size) = options.declared_size {
            self.validator.validate_size(size)?;
            record.declare_size(size)?;
        }

        let remaining = record.remaining().unwrap_or_else(|| {
            self.validator
                .max_upload_size()
                .saturating_sub(record.bytes_written)
        });
        if let Some(len) = options.content_length {
            if len > remaining {
                return Err(too_large(&record, remaining));
            }
        }

        let mut state = self
            .hasher
            .init(id, offset, self.storage.as_ref(), &record.backend_ref)
            .await?;
        if let Some(expected) = options.expected_prefix_hash.as_deref() {
            if !state.matches(expected) {
                return Err(AppError::Conflict(format!(
                    "Range hash does not match the first {} bytes of upload {}",
                    offset, id
                )));
            }
        }

        let overflow = AtomicBool::new(false);
        let body = limit_stream(body, remaining, &overflow);
        let body = match &options.checksum {
            Some(checksum) => {
                let buffer = collect_stream(body, u64::MAX)
                    .await
                    .map_err(|e| body_error(e, &overflow, &record, remaining))?;
                verify_checksum(checksum, &buffer)?;
                single_chunk(buffer)
            }
            None => body,
        };

        let written = self
            .storage
            .write(&record.backend_ref, offset, hash_stream(body, &mut state))
            .await;
        let new_length = written.map_err(|e| body_error(e, &overflow, &record, remaining))?;

        if options.final_chunk && record.size.is_none() {
            record.declare_size(new_length)?;
        }
        record.record_progress(new_length)?;
        if record.is_complete() {
            self.save(&record).await?;
        } else {
            record.touch(self.ttl);
            retry_transient(self.retry, "meta.touch", || self.meta.touch(id, &record)).await?;
        }

        if record.is_complete() {
            self.hasher.evict(id);
        } else {
            self.hasher.store(id, new_length, state.clone());
        }

        tracing::info!(
            upload_id = %id,
            offset,
            bytes_written = record.bytes_written,
            size = ?record.size,
            status = record.status.as_str(),
            "Chunk written"
        );

        let completed_now = record.is_complete();
        Ok((
            WriteOutcome {
                record,
                range_hash: Some(state.digest(DigestEncoding::Hex)),
            },
            completed_now,
        ))
    }

    /// Remove the bytes and the record.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        validate_upload_id(id)?;
        let handle = self.locks.acquire(id);
        let guard = handle.slot().write.lock().await;
        let record = self.fetch(id).await?;
        self.purge(record, UploadStatus::Deleted).await?;
        drop(guard);
        handle.notify_progress();
        tracing::info!(upload_id = %id, "Upload deleted");
        Ok(())
    }

    /// Delete up to [`MAX_BATCH_DELETE`] uploads; a failure on one id does not
    /// stop the others.
    pub async fn delete_batch(&self, ids: &[String]) -> Result<Vec<BatchDeleteResult>, AppError> {
        if ids.is_empty() {
            return Err(AppError::InvalidInput("No upload ids given".to_string()));
        }
        if ids.len() > MAX_BATCH_DELETE {
            return Err(AppError::InvalidInput(format!(
                "At most {} ids per batch, got {}",
                MAX_BATCH_DELETE,
                ids.len()
            )));
        }

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let (status, error) = match self.delete(id).await {
                Ok(()) => (BatchDeleteStatus::Deleted, None),
                Err(AppError::NotFound(_)) => (BatchDeleteStatus::NotFound, None),
                Err(e) => (BatchDeleteStatus::Error, Some(e.client_message())),
            };
            results.push(BatchDeleteResult {
                id: id.clone(),
                status,
                error,
            });
        }
        Ok(results)
    }

    /// Live uploads, oldest first. Expired ones are left to the sweep.
    pub async fn list(&self) -> Result<Vec<UploadRecord>, AppError> {
        let mut records: Vec<UploadRecord> = self
            .meta
            .list()
            .await?
            .into_iter()
            .filter(|record| !is_sweepable(record))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Sweep every expired in-flight upload; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, AppError> {
        let expired: Vec<String> = self
            .meta
            .list()
            .await?
            .into_iter()
            .filter(is_sweepable)
            .map(|record| record.id)
            .collect();

        let mut purged = 0;
        for id in expired {
            match self.get(&id).await {
                Err(AppError::Gone(_)) => purged += 1,
                Ok(_) | Err(AppError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(upload_id = %id, error = %e, "Failed to purge expired upload");
                }
            }
        }
        Ok(purged)
    }

    fn prepare(&self, new: NewUpload) -> Result<UploadRecord, AppError> {
        let id = new.id.unwrap_or_else(generate_upload_id);
        validate_upload_id(&id)?;

        let original_name = new
            .original_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| id.clone());
        let name = sanitize_name(&original_name, &id)?;
        let content_type = new
            .content_type
            .as_deref()
            .map(normalize_mime_type)
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        self.validator.validate_all(&name, &content_type, new.size)?;

        Ok(UploadRecord::new(
            id,
            name,
            original_name,
            content_type,
            new.size,
            new.metadata,
            self.ttl,
        ))
    }

    async fn persist_new(&self, mut record: UploadRecord) -> Result<UploadRecord, AppError> {
        let backend_ref =
            retry_transient(self.retry, "storage.create", || self.storage.create(&record)).await?;
        record.backend_ref = backend_ref;

        if record.size == Some(0) {
            record.record_progress(0)?;
        }

        if let Err(e) = self.save(&record).await {
            if let Err(cleanup) = self.storage.delete(&record.backend_ref).await {
                tracing::warn!(upload_id = %record.id, error = %cleanup, "Failed to remove data of unsaved upload");
            }
            return Err(e);
        }

        tracing::info!(
            upload_id = %record.id,
            size = ?record.size,
            content_type = %record.content_type,
            expires_at = ?record.expired_at,
            "Upload created"
        );
        if record.is_complete() {
            self.fire_complete_hook(record.clone());
        }
        Ok(record)
    }

    async fn fetch(&self, id: &str) -> Result<UploadRecord, AppError> {
        retry_transient(self.retry, "meta.get", || self.meta.get(id))
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => AppError::NotFound(format!("Upload {} not found", id)),
                other => other.into(),
            })
    }

    /// Fetch and sweep. Callers hold the slot.
    async fn load(&self, id: &str) -> Result<UploadRecord, AppError> {
        let record = self.fetch(id).await?;
        if !is_sweepable(&record) {
            return Ok(record);
        }
        let expired = match check_if_expired(&record, Utc::now()) {
            Ok(()) => return Ok(record),
            Err(expired) => expired,
        };
        self.purge(record, UploadStatus::Expired).await?;
        tracing::info!(upload_id = %id, "Expired upload swept");
        Err(expired.into())
    }

    async fn reconcile(&self, record: &mut UploadRecord) -> Result<(), AppError> {
        if record.is_complete() {
            return Ok(());
        }
        let backend_ref = record.backend_ref.clone();
        let stat =
            retry_transient(self.retry, "storage.stat", || self.storage.stat(&backend_ref)).await?;
        if stat.size <= record.bytes_written || record.size.is_some_and(|size| stat.size > size) {
            return Ok(());
        }

        tracing::warn!(
            upload_id = %record.id,
            recorded = record.bytes_written,
            stored = stat.size,
            "Record under-reports stored bytes, adopting backend length"
        );
        record.record_progress(stat.size)?;
        self.save(record).await?;
        if record.is_complete() {
            self.hasher.evict(&record.id);
            self.fire_complete_hook(record.clone());
        }
        Ok(())
    }

    async fn save(&self, record: &UploadRecord) -> Result<(), AppError> {
        retry_transient(self.retry, "meta.save", || self.meta.save(&record.id, record)).await?;
        Ok(())
    }

    async fn purge(&self, mut record: UploadRecord, status: UploadStatus) -> Result<(), AppError> {
        retry_transient(self.retry, "storage.delete", || {
            self.storage.delete(&record.backend_ref)
        })
        .await?;
        retry_transient(self.retry, "meta.delete", || self.meta.delete(&record.id)).await?;
        self.hasher.evict(&record.id);

        if let Err(e) = record.transition(status) {
            tracing::debug!(upload_id = %record.id, error = %e, "Status left unchanged on removal");
        }
        self.fire_delete_hook(record);
        Ok(())
    }

    fn fire_complete_hook(&self, record: UploadRecord) {
        let hook = self.hook.clone();
        tokio::spawn(async move {
            if let Err(e) = hook.on_complete(&record).await {
                tracing::warn!(upload_id = %record.id, error = %e, "Completion hook failed");
            }
        });
    }

    fn fire_delete_hook(&self, record: UploadRecord) {
        let hook = self.hook.clone();
        tokio::spawn(async move {
            if let Err(e) = hook.on_delete(&record).await {
                tracing::warn!(upload_id = %record.id, error = %e, "Delete hook failed");
            }
        });
    }
}

/// In flight and past its deadline.
fn is_sweepable(record: &UploadRecord) -> bool {
    !record.status.is_terminal() && record.is_expired_at(Utc::now())
}

fn offset_conflict(offset: u64, current: u64) -> AppError {
    AppError::Conflict(format!(
        "Upload-Offset {} does not match current offset {}",
        offset, current
    ))
}

fn too_large(record: &UploadRecord, remaining: u64) -> AppError {
    match record.size {
        Some(size) => AppError::PayloadTooLarge(format!(
            "Chunk exceeds the declared upload length {} ({} bytes remaining)",
            size, remaining
        )),
        None => AppError::PayloadTooLarge(format!(
            "Upload exceeds the maximum size ({} bytes remaining)",
            remaining
        )),
    }
}

fn body_error(err: StorageError, overflow: &AtomicBool, record: &UploadRecord, limit: u64) -> AppError {
    if overflow.load(Ordering::Relaxed) {
        return too_large(record, limit);
    }
    err.into()
}

/// Whether a body of unknown length carries any byte.
async fn has_data(body: &mut ByteStream<'_>) -> Result<bool, AppError> {
    while let Some(chunk) = body.next().await {
        if !chunk?.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn verify_checksum(checksum: &ChunkChecksum, data: &[u8]) -> Result<(), AppError> {
    let actual = digest_bytes(checksum.algorithm, data, DigestEncoding::Base64);
    if actual != checksum.expected.trim() {
        return Err(AppError::ChecksumMismatch(format!(
            "{} of the chunk is {}, client sent {}",
            checksum.algorithm, actual, checksum.expected
        )));
    }
    Ok(())
}

/// Fail the stream once more than `limit` bytes went through.
fn limit_stream<'a>(body: ByteStream<'a>, limit: u64, overflow: &'a AtomicBool) -> ByteStream<'a> {
    let mut seen = 0u64;
    Box::pin(body.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > limit {
            overflow.store(true, Ordering::Relaxed);
            return Err(StorageError::StreamAborted(format!(
                "body exceeds {} bytes",
                limit
            )));
        }
        Ok(chunk)
    }))
}

/// Feed every chunk that reaches the backend into `state`.
fn hash_stream<'a>(body: ByteStream<'a>, state: &'a mut HashState) -> ByteStream<'a> {
    Box::pin(body.map(move |chunk| {
        if let Ok(bytes) = &chunk {
            state.update(bytes);
        }
        chunk
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use tusky_core::{NoOpUploadHook, UploadConfig};
    use tusky_storage::{DiskStorage, LocalMetaStorage};

    struct CountingHook {
        completed: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl UploadHook for CountingHook {
        async fn on_complete(&self, _record: &UploadRecord) -> Result<(), String> {
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_delete(&self, _record: &UploadRecord) -> Result<(), String> {
            Ok(())
        }
    }

    async fn service_with(
        dir: &tempfile::TempDir,
        tweak: impl FnOnce(&mut UploadConfig),
        hook: Arc<dyn UploadHook>,
    ) -> UploadService {
        let mut upload = UploadConfig::local(dir.path().to_string_lossy());
        tweak(&mut upload);
        let config = Config(Box::new(upload));
        let storage = DiskStorage::new(config.directory()).await.unwrap();
        let meta = LocalMetaStorage::new(
            config.meta_directory(),
            config.meta_prefix(),
            config.meta_suffix(),
        )
        .await
        .unwrap();
        UploadService::new(&config, Arc::new(storage), Arc::new(meta), hook)
            .with_retry_policy(RetryPolicy::none())
    }

    async fn service(dir: &tempfile::TempDir) -> UploadService {
        service_with(dir, |_| {}, Arc::new(NoOpUploadHook)).await
    }

    fn new_upload(id: &str, size: Option<u64>) -> NewUpload {
        NewUpload {
            id: Some(id.to_string()),
            original_name: Some("clip.mp4".to_string()),
            content_type: Some("video/mp4".to_string()),
            size,
            metadata: BTreeMap::new(),
        }
    }

    fn chunk(data: &'static [u8]) -> ByteStream<'static> {
        single_chunk(Bytes::from_static(data))
    }

    #[tokio::test]
    async fn test_chunks_complete_the_upload() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", Some(11))).await.unwrap();

        let first = service
            .write_chunk("abc123", 0, chunk(b"hello "), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(first.record.bytes_written, 6);
        assert_eq!(first.record.status, UploadStatus::Uploading);

        let second = service
            .write_chunk("abc123", 6, chunk(b"world"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(second.record.status, UploadStatus::Completed);
        assert_eq!(
            second.range_hash.as_deref(),
            Some("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
        );
    }

    #[tokio::test]
    async fn test_body_after_completion_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("done", Some(5))).await.unwrap();
        service
            .write_chunk("done", 0, chunk(b"12345"), WriteOptions::default())
            .await
            .unwrap();

        // No Content-Length, so the body itself has to be looked at.
        let err = service
            .write_chunk("done", 5, chunk(b"extra"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));

        let empty = service
            .write_chunk("done", 5, Box::pin(futures::stream::empty()), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(empty.record.bytes_written, 5);
        assert_eq!(empty.record.status, UploadStatus::Completed);
    }

    struct TouchCountingMeta {
        inner: LocalMetaStorage,
        touches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetaStorage for TouchCountingMeta {
        async fn save(&self, id: &str, record: &UploadRecord) -> tusky_storage::StorageResult<()> {
            self.inner.save(id, record).await
        }

        async fn get(&self, id: &str) -> tusky_storage::StorageResult<UploadRecord> {
            self.inner.get(id).await
        }

        async fn touch(&self, id: &str, record: &UploadRecord) -> tusky_storage::StorageResult<()> {
            self.touches.fetch_add(1, Ordering::SeqCst);
            self.inner.touch(id, record).await
        }

        async fn delete(&self, id: &str) -> tusky_storage::StorageResult<()> {
            self.inner.delete(id).await
        }

        async fn list(&self) -> tusky_storage::StorageResult<Vec<UploadRecord>> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_partial_write_refreshes_ttl_through_touch() {
        let dir = tempfile::tempdir().unwrap();
        let mut upload = UploadConfig::local(dir.path().to_string_lossy());
        upload.ttl = Some(Duration::from_secs(3600));
        let config = Config(Box::new(upload));
        let storage = DiskStorage::new(config.directory()).await.unwrap();
        let meta = Arc::new(TouchCountingMeta {
            inner: LocalMetaStorage::new(
                config.meta_directory(),
                config.meta_prefix(),
                config.meta_suffix(),
            )
            .await
            .unwrap(),
            touches: AtomicUsize::new(0),
        });
        let service = UploadService::new(
            &config,
            Arc::new(storage),
            meta.clone(),
            Arc::new(NoOpUploadHook),
        )
        .with_retry_policy(RetryPolicy::none());

        let created = service.create(new_upload("ttl1", Some(10))).await.unwrap();
        let partial = service
            .write_chunk("ttl1", 0, chunk(b"12345"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(meta.touches.load(Ordering::SeqCst), 1);
        assert!(partial.record.expired_at >= created.expired_at);
        assert_eq!(service.get("ttl1").await.unwrap().bytes_written, 5);

        service
            .write_chunk("ttl1", 5, chunk(b"67890"), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(meta.touches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_offset_is_rejected_without_effect() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", Some(10))).await.unwrap();
        service
            .write_chunk("abc123", 0, chunk(b"12345"), WriteOptions::default())
            .await
            .unwrap();

        let err = service
            .write_chunk("abc123", 0, chunk(b"xxxxx"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(service.get("abc123").await.unwrap().bytes_written, 5);
    }

    #[tokio::test]
    async fn test_future_offset_times_out_as_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            |c| c.chunk_order_wait = Duration::from_millis(50),
            Arc::new(NoOpUploadHook),
        )
        .await;
        service.create(new_upload("abc123", Some(10))).await.unwrap();

        let err = service
            .write_chunk("abc123", 5, chunk(b"67890"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_out_of_order_chunk_waits_for_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(&dir).await);
        service.create(new_upload("abc123", Some(10))).await.unwrap();

        let later = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .write_chunk("abc123", 5, chunk(b"67890"), WriteOptions::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .write_chunk("abc123", 0, chunk(b"12345"), WriteOptions::default())
            .await
            .unwrap();

        let outcome = later.await.unwrap().unwrap();
        assert_eq!(outcome.record.bytes_written, 10);
        assert!(outcome.record.is_complete());
    }

    #[tokio::test]
    async fn test_chunk_past_declared_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", Some(4))).await.unwrap();

        let err = service
            .write_chunk("abc123", 0, chunk(b"too long"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(_)));
        assert_eq!(service.get("abc123").await.unwrap().bytes_written, 0);
    }

    #[tokio::test]
    async fn test_final_chunk_fixes_unknown_size() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", None)).await.unwrap();

        let outcome = service
            .write_chunk(
                "abc123",
                0,
                chunk(b"payload"),
                WriteOptions {
                    final_chunk: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.record.size, Some(7));
        assert!(outcome.record.is_complete());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", Some(11))).await.unwrap();

        let err = service
            .write_chunk(
                "abc123",
                0,
                chunk(b"hello world"),
                WriteOptions {
                    checksum: Some(ChunkChecksum {
                        algorithm: ChecksumAlgorithm::Sha1,
                        expected: "AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ChecksumMismatch(_)));
        assert_eq!(service.get("abc123").await.unwrap().bytes_written, 0);
    }

    #[tokio::test]
    async fn test_prefix_hash_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("abc123", Some(11))).await.unwrap();
        let first = service
            .write_chunk("abc123", 0, chunk(b"hello "), WriteOptions::default())
            .await
            .unwrap();

        let err = service
            .write_chunk(
                "abc123",
                6,
                chunk(b"world"),
                WriteOptions {
                    expected_prefix_hash: Some("deadbeef".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        service
            .write_chunk(
                "abc123",
                6,
                chunk(b"world"),
                WriteOptions {
                    expected_prefix_hash: first.range_hash,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconciles_bytes_the_record_missed() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let record = service.create(new_upload("abc123", Some(10))).await.unwrap();

        // Bytes reached the backend but the record save never happened.
        service
            .storage
            .write(&record.backend_ref, 0, chunk(b"12345"))
            .await
            .unwrap();

        let err = service
            .write_chunk("abc123", 0, chunk(b"12345"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(service.get("abc123").await.unwrap().bytes_written, 5);
    }

    #[tokio::test]
    async fn test_expired_upload_is_gone_then_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        let mut record = service.create(new_upload("abc123", Some(10))).await.unwrap();
        record.expired_at = Some(Utc::now() - chrono::Duration::seconds(1));
        service.meta.save("abc123", &record).await.unwrap();

        assert!(matches!(service.get("abc123").await, Err(AppError::Gone(_))));
        assert!(matches!(service.get("abc123").await, Err(AppError::NotFound(_))));
        assert!(service.storage.stat(&record.backend_ref).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_expired_counts_swept_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        for id in ["old1", "old2", "live"] {
            service.create(new_upload(id, Some(10))).await.unwrap();
        }
        for id in ["old1", "old2"] {
            let mut record = service.get(id).await.unwrap();
            record.expired_at = Some(Utc::now() - chrono::Duration::seconds(1));
            service.meta.save(id, &record).await.unwrap();
        }

        assert_eq!(service.purge_expired().await.unwrap(), 2);
        let remaining: Vec<String> = service.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn test_zero_length_upload_completes_on_create() {
        let dir = tempfile::tempdir().unwrap();
        let hook = Arc::new(CountingHook {
            completed: AtomicUsize::new(0),
        });
        let service = service_with(&dir, |_| {}, hook.clone()).await;

        let record = service.create(new_upload("empty", Some(0))).await.unwrap();
        assert!(record.is_complete());

        for _ in 0..50 {
            if hook.completed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hook.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_delete_reports_each_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir).await;
        service.create(new_upload("keep1", Some(3))).await.unwrap();

        let results = service
            .delete_batch(&["keep1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(results[0].status, BatchDeleteStatus::Deleted);
        assert_eq!(results[1].status, BatchDeleteStatus::NotFound);

        let too_many: Vec<String> = (0..=MAX_BATCH_DELETE).map(|i| format!("id{}", i)).collect();
        assert!(service.delete_batch(&too_many).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_disallowed_type_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(
            &dir,
            |c| c.allow_mime = vec!["video/*".to_string()],
            Arc::new(NoOpUploadHook),
        )
        .await;

        let mut new = new_upload("notes", Some(3));
        new.content_type = Some("text/plain".to_string());
        let err = service.create(new).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedMediaType(_)));
        assert!(matches!(service.get("notes").await, Err(AppError::NotFound(_))));
    }
}
