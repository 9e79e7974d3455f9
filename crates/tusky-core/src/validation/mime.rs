/// Lowercase and strip parameters (`text/plain; charset=utf-8` -> `text/plain`).
pub fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}

/// Match a candidate type against one allowlist pattern.
///
/// Patterns are exact types, `type/*` wildcards or `*/*`.
pub fn mime_matches(pattern: &str, candidate: &str) -> bool {
    let pattern = normalize_mime_type(pattern);
    let candidate = normalize_mime_type(candidate);
    if pattern == "*/*" || pattern == "*" {
        return true;
    }
    match pattern.strip_suffix("/*") {
        Some(category) => candidate
            .split_once('/')
            .is_some_and(|(kind, subtype)| kind == category && !subtype.is_empty()),
        None => pattern == candidate,
    }
}

/// An empty allowlist, or one containing `application/octet-stream`, accepts everything.
pub fn mime_allowed(allowlist: &[String], candidate: &str) -> bool {
    if allowlist.is_empty()
        || allowlist
            .iter()
            .any(|p| normalize_mime_type(p) == "application/octet-stream")
    {
        return true;
    }
    allowlist.iter().any(|pattern| mime_matches(pattern, candidate))
}
