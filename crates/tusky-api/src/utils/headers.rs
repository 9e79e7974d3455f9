//! Header parsing shared by both upload protocols.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use tusky_core::AppError;

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
}

/// A non-negative integer header; present but unparsable is a 400.
pub fn header_u64(headers: &HeaderMap, name: &str) -> Result<Option<u64>, AppError> {
    match header_str(headers, name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("Invalid {} header: {}", name, raw))),
    }
}

/// `Content-Range` of an upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes start-end/total` (inclusive end; `*` total is unknown)
    Bytes {
        start: u64,
        end: u64,
        total: Option<u64>,
    },
    /// `bytes */total`: ask for the current offset, write nothing
    Query { total: Option<u64> },
}

impl ContentRange {
    pub fn total(&self) -> Option<u64> {
        match self {
            ContentRange::Bytes { total, .. } | ContentRange::Query { total } => *total,
        }
    }
}

pub fn parse_content_range(raw: &str) -> Result<ContentRange, AppError> {
    let invalid = || AppError::BadRequest(format!("Invalid Content-Range: {}", raw));

    let spec = raw.trim().strip_prefix("bytes").ok_or_else(invalid)?.trim();
    let (range, total) = spec.split_once('/').ok_or_else(invalid)?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().map_err(|_| invalid())?),
    };

    if range.trim() == "*" {
        return Ok(ContentRange::Query { total });
    }

    let (start, end) = range.split_once('-').ok_or_else(invalid)?;
    let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
    let end = end.trim().parse::<u64>().map_err(|_| invalid())?;
    if end < start || total.is_some_and(|t| end >= t) {
        return Err(invalid());
    }
    Ok(ContentRange::Bytes { start, end, total })
}

/// Resolved download range, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parse a single `Range: bytes=...` against `length` available bytes.
/// Multi-range and non-byte units are ignored (full content is served).
pub fn parse_range(raw: &str, length: u64) -> Result<Option<ByteRange>, AppError> {
    let Some(spec) = raw.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let unsatisfiable =
        || AppError::RangeNotSatisfiable(format!("Range {} outside 0-{}", raw, length));
    let invalid = || AppError::BadRequest(format!("Invalid Range: {}", raw));

    let (first, last) = spec.split_once('-').ok_or_else(invalid)?;
    let (first, last) = (first.trim(), last.trim());

    let range = if first.is_empty() {
        // suffix: last N bytes
        let n = last.parse::<u64>().map_err(|_| invalid())?;
        if n == 0 || length == 0 {
            return Err(unsatisfiable());
        }
        ByteRange {
            start: length.saturating_sub(n),
            end: length,
        }
    } else {
        let start = first.parse::<u64>().map_err(|_| invalid())?;
        let end = if last.is_empty() {
            length
        } else {
            let last = last.parse::<u64>().map_err(|_| invalid())?;
            if last < start {
                return Err(invalid());
            }
            last.saturating_add(1).min(length)
        };
        if start >= length {
            return Err(unsatisfiable());
        }
        ByteRange { start, end }
    };
    Ok(Some(range))
}

/// File name from a `Content-Disposition` header (`filename*` wins over `filename`).
pub fn disposition_filename(raw: &str) -> Option<String> {
    let mut plain = None;
    for param in raw.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let value = value.trim();
                let encoded = value
                    .split_once("''")
                    .map(|(_, encoded)| encoded)
                    .unwrap_or(value);
                if let Ok(decoded) = percent_decode_str(encoded).decode_utf8() {
                    return Some(decoded.into_owned());
                }
            }
            "filename" => {
                plain = Some(value.trim().trim_matches('"').to_string());
            }
            _ => {}
        }
    }
    plain.filter(|name| !name.is_empty())
}

/// `attachment` disposition with an ASCII fallback and the exact UTF-8 name.
pub fn attachment_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}

/// RFC 7231 IMF-fixdate.
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
