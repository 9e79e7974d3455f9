//! Tusky Core Library
//!
//! Domain model, error taxonomy, configuration and validation shared by the
//! storage layer and the HTTP API.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::{BaseConfig, Config, UploadConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use hooks::{LoggingUploadHook, NoOpUploadHook, UploadHook};
pub use models::{UploadRecord, UploadStatus};
pub use storage_types::{ChecksumAlgorithm, StorageBackend};
pub use validation::ValidationError;
