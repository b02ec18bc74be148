//! Conditional request handling: `If-None-Match` against the response ETag,
//! and the entity headers a 304 must not carry.

/// Headers describing the entity body, stripped from 304 responses.
const ENTITY_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-range",
    "content-encoding",
    "content-language",
    "content-disposition",
    "content-digest",
    "digest",
    "last-modified",
];

/// Builds the response ETag from the content's hash digest.
pub fn etag_from_digest(digest: &str) -> String {
    format!("\"{digest}\"")
}

fn normalize_etag(value: &str) -> &str {
    let value = value.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    value.trim_matches('"')
}

/// A 304 is only correct when the validator matches AND the body would have
/// been produced locally anyway: either the data is cached here, or the
/// request is a HEAD and no body is owed at all.
pub fn should_send_not_modified(
    if_none_match: Option<&str>,
    etag: &str,
    data_locally_cached: bool,
    is_head: bool,
) -> bool {
    let Some(candidate) = if_none_match else {
        return false;
    };
    if !(data_locally_cached || is_head) {
        return false;
    }
    candidate
        .split(',')
        .any(|entry| normalize_etag(entry) == normalize_etag(etag))
}

pub fn is_entity_header(name: &str) -> bool {
    ENTITY_HEADERS
        .iter()
        .any(|entity| entity.eq_ignore_ascii_case(name))
}

/// Removes entity headers in place, for assembling a 304.
pub fn strip_entity_headers(headers: &mut Vec<(String, String)>) {
    headers.retain(|(name, _)| !is_entity_header(name));
}
