//! Shared key generation for storage backends.
//!
//! Data: `{id}` on disk, `{id}/{offset:020}` parts plus `{id}/.upload` marker in
//! object stores. Records: `{prefix}{id}{suffix}`.

use uuid::Uuid;

/// Marker object written by object-store `create`.
pub const UPLOAD_MARKER: &str = ".upload";

/// Generate a fresh upload id (32 lowercase hex characters).
pub fn generate_upload_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Data key for an upload.
pub fn data_key(id: &str) -> String {
    id.to_string()
}

/// Key of the part object holding bytes starting at `offset`.
pub fn part_key(backend_ref: &str, offset: u64) -> String {
    format!("{}/{:020}", backend_ref, offset)
}

pub fn marker_key(backend_ref: &str) -> String {
    format!("{}/{}", backend_ref, UPLOAD_MARKER)
}

/// Parse the offset out of a part object's file name. Non-part names yield `None`.
pub fn part_offset(file_name: &str) -> Option<u64> {
    if file_name.len() != 20 || !file_name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    file_name.parse().ok()
}

/// Side-car key for an upload record.
pub fn meta_key(prefix: &str, id: &str, suffix: &str) -> String {
    format!("{}{}{}", prefix, id, suffix)
}

/// Inverse of [`meta_key`]: recover the id from a side-car name.
pub fn id_from_meta_key<'a>(key: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?
        .strip_suffix(suffix)
        .filter(|id| !id.is_empty())
}
