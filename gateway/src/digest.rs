//! RFC 9530 `Content-Digest` construction.
//!
//! Hashes are carried internally as base64url; the header demands standard
//! base64 with padding, wrapped in the structured-field byte-sequence
//! colons.

use openssl::sha;

/// Converts a base64url digest into the RFC 9530 header value
/// `sha-256=:BASE64:` (standard alphabet, padded).
pub fn content_digest_header(b64url_digest: &str) -> String {
    let mut standard = b64url_digest.replace('-', "+").replace('_', "/");
    while standard.len() % 4 != 0 {
        standard.push('=');
    }
    format!("sha-256=:{standard}:")
}

/// Hashes raw bytes and renders the header value directly.
pub fn content_digest_for_bytes(data: &[u8]) -> String {
    content_digest_header(&base64_url::encode(&sha::sha256(data)))
}
