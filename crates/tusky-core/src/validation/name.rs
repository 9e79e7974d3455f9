use super::ValidationError;

const MAX_NAME_LENGTH: usize = 255;
const MAX_ID_LENGTH: usize = 128;

/// Reject names that could escape the storage root.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.contains('\0') {
        return Err(ValidationError::InvalidName(
            "name contains a NUL byte".to_string(),
        ));
    }
    if name.starts_with('/') || name.starts_with('\\') || has_drive_prefix(name) {
        return Err(ValidationError::InvalidName(format!(
            "absolute paths are not allowed: {}",
            name
        )));
    }
    if name.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ValidationError::InvalidName(format!(
            "path traversal is not allowed: {}",
            name
        )));
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Validate then reduce a client name to a safe file name.
///
/// Directory components are dropped and characters outside
/// `[A-Za-z0-9._-]` and spaces become `_`. Falls back to `fallback`
/// when nothing usable is left.
pub fn sanitize_name(name: &str, fallback: &str) -> Result<String, ValidationError> {
    validate_name(name)?;
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();

    let sanitized: String = last
        .chars()
        .take(MAX_NAME_LENGTH)
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches(|c| c == '.' || c == ' ').is_empty() {
        return Ok(fallback.to_string());
    }
    Ok(sanitized)
}

pub fn validate_upload_id(id: &str) -> Result<(), ValidationError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if id.is_empty() || id.len() > MAX_ID_LENGTH || !valid_chars {
        return Err(ValidationError::InvalidId(id.to_string()));
    }
    Ok(())
}
