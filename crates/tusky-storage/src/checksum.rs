//! Incremental, resumable content hashing per upload.
//!
//! The running hash of `[0, offset)` is cached per upload id. A miss (cold
//! cache, restart, another worker) re-derives the hash from the stored bytes,
//! so the cache only ever saves I/O.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use lru::LruCache;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tusky_core::ChecksumAlgorithm;

use crate::traits::{Storage, StorageResult};

/// Output encoding for a digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestEncoding {
    Hex,
    Base64,
}

/// Running hash state.
#[derive(Clone)]
pub enum HashState {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl HashState {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => HashState::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => HashState::Sha256(Sha256::new()),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            HashState::Sha1(_) => ChecksumAlgorithm::Sha1,
            HashState::Sha256(_) => ChecksumAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            HashState::Sha1(hasher) => hasher.update(bytes),
            HashState::Sha256(hasher) => hasher.update(bytes),
        }
    }

    /// Finalize a copy; `self` keeps accumulating.
    pub fn digest(&self, encoding: DigestEncoding) -> String {
        let raw = match self {
            HashState::Sha1(hasher) => hasher.clone().finalize().to_vec(),
            HashState::Sha256(hasher) => hasher.clone().finalize().to_vec(),
        };
        match encoding {
            DigestEncoding::Hex => hex::encode(raw),
            DigestEncoding::Base64 => STANDARD.encode(raw),
        }
    }

    /// Compare against a client digest given in hex or base64.
    pub fn matches(&self, expected: &str) -> bool {
        let expected = expected.trim();
        self.digest(DigestEncoding::Hex).eq_ignore_ascii_case(expected)
            || self.digest(DigestEncoding::Base64) == expected
    }
}

/// One-shot digest of a buffer.
pub fn digest_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8], encoding: DigestEncoding) -> String {
    let mut state = HashState::new(algorithm);
    state.update(bytes);
    state.digest(encoding)
}

struct CachedState {
    offset: u64,
    state: HashState,
    stored_at: Instant,
}

/// Per-upload hash states with a bounded, time-evicting cache.
pub struct RangeHasher {
    algorithm: ChecksumAlgorithm,
    ttl: Duration,
    cache: Option<Mutex<LruCache<String, CachedState>>>,
}

impl RangeHasher {
    /// A `capacity` of 0 disables caching.
    pub fn new(algorithm: ChecksumAlgorithm, capacity: usize, ttl: Duration) -> Self {
        Self {
            algorithm,
            ttl,
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn disabled(algorithm: ChecksumAlgorithm) -> Self {
        Self::new(algorithm, 0, Duration::ZERO)
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Hash state for `[0, from_offset)` of the upload.
    pub async fn init(
        &self,
        id: &str,
        from_offset: u64,
        storage: &dyn Storage,
        backend_ref: &str,
    ) -> StorageResult<HashState> {
        if let Some(state) = self.cached(id, from_offset) {
            tracing::trace!(upload_id = %id, offset = from_offset, "Range hash cache hit");
            return Ok(state);
        }

        let mut state = HashState::new(self.algorithm);
        if from_offset > 0 {
            let mut stream = storage.read(backend_ref, 0, from_offset).await?;
            let mut hashed = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                hashed += chunk.len() as u64;
                state.update(&chunk);
            }
            tracing::debug!(
                upload_id = %id,
                offset = from_offset,
                hashed_bytes = hashed,
                "Range hash re-derived from storage"
            );
        }
        self.store(id, from_offset, state.clone());
        Ok(state)
    }

    pub fn update(&self, mut state: HashState, bytes: &[u8]) -> HashState {
        state.update(bytes);
        state
    }

    pub fn digest(&self, state: &HashState, encoding: DigestEncoding) -> String {
        state.digest(encoding)
    }

    /// Remember the state reached at `offset`.
    pub fn store(&self, id: &str, offset: u64, state: HashState) {
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
            cache.put(
                id.to_string(),
                CachedState {
                    offset,
                    state,
                    stored_at: Instant::now(),
                },
            );
        }
    }

    pub fn evict(&self, id: &str) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop(id);
        }
    }

    fn cached(&self, id: &str, offset: u64) -> Option<HashState> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = cache.peek(id)?.stored_at.elapsed() > self.ttl;
        if expired {
            cache.pop(id);
            return None;
        }
        let entry = cache.get(id)?;
        (entry.offset == offset).then(|| entry.state.clone())
    }
}
