//! Gateway identification and hop-tracking headers.
//!
//! Every outbound request carries the node's release. Requests proxied
//! onward on behalf of a user additionally increment the hop count and pin
//! the origin, so loops across gateways are detectable. Peer gateways also
//! receive the same attributes as `ar-io-*` query parameters.

use lazy_static::lazy_static;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING};

lazy_static! {
    pub static ref NODE_RELEASE: HeaderName = HeaderName::from_static("x-ar-io-node-release");
    pub static ref HOPS: HeaderName = HeaderName::from_static("x-ar-io-hops");
    pub static ref ORIGIN: HeaderName = HeaderName::from_static("x-ar-io-origin");
    pub static ref ORIGIN_NODE_RELEASE: HeaderName =
        HeaderName::from_static("x-ar-io-origin-node-release");
}

/// Hop/origin attributes of the incoming request being proxied, if any.
#[derive(Debug, Clone, Default)]
pub struct RequestAttributes {
    pub hops: Option<u32>,
    pub origin: Option<String>,
    pub origin_node_release: Option<String>,
}

fn header_value(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
}

/// Headers for trusted-node requests. `identity` keeps Content-Length
/// byte-accurate for billing.
pub fn trusted_node_headers(node_release: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(NODE_RELEASE.clone(), header_value(node_release));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers
}

/// Headers for requests forwarded to peer gateways: hop count incremented,
/// origin pinned to the first gateway in the chain.
pub fn peer_gateway_headers(node_release: &str, attributes: &RequestAttributes) -> HeaderMap {
    let mut headers = trusted_node_headers(node_release);
    let hops = attributes.hops.unwrap_or(0) + 1;
    headers.insert(HOPS.clone(), header_value(&hops.to_string()));

    let origin = attributes.origin.as_deref().unwrap_or(node_release);
    headers.insert(ORIGIN.clone(), header_value(origin));
    let origin_release = attributes
        .origin_node_release
        .as_deref()
        .unwrap_or(node_release);
    headers.insert(ORIGIN_NODE_RELEASE.clone(), header_value(origin_release));
    headers
}

/// The same attributes as query parameters, appended when the target is a
/// peer gateway.
pub fn ar_io_query_params(attributes: &RequestAttributes, node_release: &str) -> Vec<(String, String)> {
    let hops = attributes.hops.unwrap_or(0) + 1;
    vec![
        ("ar-io-hops".to_string(), hops.to_string()),
        (
            "ar-io-origin".to_string(),
            attributes
                .origin
                .clone()
                .unwrap_or_else(|| node_release.to_string()),
        ),
        (
            "ar-io-origin-node-release".to_string(),
            attributes
                .origin_node_release
                .clone()
                .unwrap_or_else(|| node_release.to_string()),
        ),
    ]
}
