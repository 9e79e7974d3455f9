//! Upload lifecycle: creation, ordered chunk writes, completion, deletion and expiry.

mod locks;
mod service;
mod types;

pub use service::UploadService;
pub use types::{
    BatchDeleteResult, BatchDeleteStatus, ChunkChecksum, CreateOutcome, WriteOptions, WriteOutcome,
};
