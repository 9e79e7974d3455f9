//! Tusky Storage Library
//!
//! Byte storage and record storage for resumable uploads.
//!
//! # Layout
//!
//! - **Data**: one object per upload, keyed by the upload id. Disk keeps a
//!   single file `<directory>/<id>`; object stores keep one part object per
//!   chunk under `<id>/` because they cannot append.
//! - **Records**: one side-car per upload at `<prefix><id><suffix>`.
//!
//! Key generation is centralized in the `keys` module so all backends stay consistent.

pub mod checksum;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod meta;
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
pub mod object;
pub mod retry;
pub mod traits;

// Re-export commonly used types
pub use checksum::{DigestEncoding, HashState, RangeHasher};
pub use factory::{create_storage, StorageHandles};
#[cfg(feature = "storage-local")]
pub use local::DiskStorage;
#[cfg(feature = "storage-local")]
pub use meta::LocalMetaStorage;
pub use meta::MetaStorage;
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
pub use meta::ObjectMetaStorage;
#[cfg(any(feature = "storage-s3", feature = "storage-gcs"))]
pub use object::ObjectStorage;
pub use retry::{retry_transient, RetryPolicy};
pub use traits::{collect_stream, single_chunk, ByteStream, ObjectStat, Storage, StorageError, StorageResult};
pub use tusky_core::StorageBackend;
