pub mod metadata;
pub mod upload;

pub use metadata::{decode_metadata, encode_metadata};
pub use upload::{NewUpload, UploadRecord, UploadStatus};
