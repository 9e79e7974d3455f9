//! `key base64(value)` pair encoding.
//!
//! Used for the TUS `Upload-Metadata` header and for the flattened metadata
//! string inside persisted side-car records.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;

use crate::AppError;

/// Encode a metadata map as comma-separated `key base64(value)` pairs.
///
/// Empty values are written as a bare key.
pub fn encode_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{} {}", key, STANDARD.encode(value.as_bytes()))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode comma-separated `key base64(value)` pairs.
pub fn decode_metadata(raw: &str) -> Result<BTreeMap<String, String>, AppError> {
    let mut metadata = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let mut parts = pair.splitn(2, ' ');
        let key = parts.next().unwrap_or_default().trim();
        if key.is_empty() || key.chars().any(|c| c.is_whitespace() || c == ',') {
            return Err(AppError::BadRequest(format!(
                "Invalid metadata key in pair '{}'",
                pair
            )));
        }
        let value = match parts.next().map(str::trim) {
            Some(encoded) if !encoded.is_empty() => {
                let bytes = STANDARD.decode(encoded).map_err(|e| {
                    AppError::BadRequest(format!("Invalid base64 for metadata '{}': {}", key, e))
                })?;
                String::from_utf8(bytes).map_err(|_| {
                    AppError::BadRequest(format!("Metadata '{}' is not valid UTF-8", key))
                })?
            }
            _ => String::new(),
        };
        if metadata.insert(key.to_string(), value).is_some() {
            return Err(AppError::BadRequest(format!(
                "Duplicate metadata key '{}'",
                key
            )));
        }
    }
    Ok(metadata)
}
