//! API constants
//!
//! Route paths and protocol header names shared by handlers, middleware and tests.

/// Base path of the upload collection
pub const FILES_PATH: &str = "/files";

/// Protocol version this server speaks
pub const TUS_VERSION: &str = "1.0.0";

/// Advertised in `Tus-Extension`
pub const TUS_EXTENSIONS: &str =
    "creation,creation-with-upload,creation-defer-length,termination,expiration,checksum";

/// Body type required for chunk appends
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

/// Maximum ids in one batch delete
pub const MAX_BATCH_DELETE: usize = 50;

/// Slack on top of the max upload size for multipart framing
pub const BODY_LIMIT_SLACK: u64 = 1024 * 1024;

pub mod headers {
    pub const TUS_RESUMABLE: &str = "tus-resumable";
    pub const TUS_VERSION: &str = "tus-version";
    pub const TUS_EXTENSION: &str = "tus-extension";
    pub const TUS_MAX_SIZE: &str = "tus-max-size";
    pub const TUS_CHECKSUM_ALGORITHM: &str = "tus-checksum-algorithm";
    pub const UPLOAD_OFFSET: &str = "upload-offset";
    pub const UPLOAD_LENGTH: &str = "upload-length";
    pub const UPLOAD_DEFER_LENGTH: &str = "upload-defer-length";
    pub const UPLOAD_METADATA: &str = "upload-metadata";
    pub const UPLOAD_EXPIRES: &str = "upload-expires";
    pub const UPLOAD_CHECKSUM: &str = "upload-checksum";
    pub const X_FILE_NAME: &str = "x-file-name";
    pub const X_UPLOAD_METADATA: &str = "x-upload-metadata";
    pub const X_UPLOAD_CONTENT_LENGTH: &str = "x-upload-content-length";
    pub const X_RANGE_HASH: &str = "x-range-hash";
}
