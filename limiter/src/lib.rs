//! Byte-accurate request rate limiting.
//!
//! Two buckets gate every request: one keyed by the resource, one by the
//! client IP. Consumption is predicted up front from the last observed
//! response size and reconciled once the true byte count is known, so heavy
//! responses are billed what they actually cost.

pub mod allowlist;
pub mod bucket;
pub mod gate;
pub mod keys;

pub use allowlist::{client_ip_candidates, IpAllowList};
pub use bucket::{
    BucketStore, ConsumeArgs, ConsumeOutcome, MemoryBucketStore, TokenBucket, TOKEN_BYTES,
};
pub use gate::{ClientAddr, GateDecision, RateLimitConfig, RateLimiter, RequestCharge};
pub use keys::{ip_key, resource_key};
