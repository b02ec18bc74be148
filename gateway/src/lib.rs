//! The gateway's data-retrieval core.
//!
//! Ties the member crates together and adds the response-shaping helpers
//! the HTTP edge needs: exact range accounting for billing, conditional
//! request handling, and RFC 9530 content digests.

pub mod conditional;
pub mod digest;
pub mod range;
pub mod service;

pub use conditional::{etag_from_digest, should_send_not_modified, strip_entity_headers};
pub use digest::{content_digest_for_bytes, content_digest_header};
pub use range::{parse_range_header, response_byte_size, ByteRange};
pub use service::{GatewayConfig, GatewayService};
