//! Token buckets and the store that holds them.
//!
//! The store contract is linearizable per key: get-or-create, refill, and
//! consume happen as one step. The in-memory implementation below serializes
//! on the key's map entry; a distributed deployment keeps the same contract
//! with an atomic script at the store boundary.

use async_trait::async_trait;
use dashmap::DashMap;
use eyre::Result;

/// One token pays for this many response bytes.
pub const TOKEN_BYTES: u64 = 1024;

/// A single refillable bucket. `tokens` is signed: the post-response
/// adjustment path may drive it negative when a response turned out larger
/// than predicted.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    pub key: String,
    pub tokens: f64,
    pub last_refill_ms: u64,
    pub capacity: u64,
    /// Tokens per second.
    pub refill_rate: u64,
    /// Size of the last observed response for this key, used to predict the
    /// next consumption.
    pub content_length: Option<u64>,
}

impl TokenBucket {
    fn new(key: &str, capacity: u64, refill_rate: u64, now_ms: u64) -> Self {
        TokenBucket {
            key: key.to_string(),
            tokens: capacity as f64,
            last_refill_ms: now_ms,
            capacity,
            refill_rate,
            content_length: None,
        }
    }

    /// Tokens a request will be charged: the cached content length when one
    /// is known (floored to at least one token), the caller's ask otherwise.
    pub fn tokens_needed(&self, requested: u64) -> u64 {
        match self.content_length {
            Some(len) if len > 0 => (len / TOKEN_BYTES).max(1),
            _ => requested,
        }
    }
}

/// Arguments to [`BucketStore::get_or_create_and_consume`].
#[derive(Debug, Clone)]
pub struct ConsumeArgs<'a> {
    pub key: &'a str,
    pub capacity: u64,
    pub refill_rate: u64,
    pub now_ms: u64,
    pub ttl_secs: u64,
    pub requested: u64,
    pub paid: bool,
    pub cap_multiplier: u64,
    pub refill_multiplier: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOutcome {
    pub bucket: TokenBucket,
    pub consumed: u64,
    pub success: bool,
}

#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically create-or-refill the bucket and consume if it holds enough
    /// tokens. On shortfall the bucket is left unchanged and `success` is
    /// false.
    async fn get_or_create_and_consume(&self, args: ConsumeArgs<'_>) -> Result<ConsumeOutcome>;

    /// Unconditional adjustment used after a response has streamed. `tokens`
    /// may be negative to hand back an over-prediction, and the balance may
    /// go negative when the response cost more than predicted.
    async fn consume_tokens(
        &self,
        key: &str,
        tokens: i64,
        now_ms: u64,
        ttl_secs: u64,
        content_length: Option<u64>,
    ) -> Result<TokenBucket>;

    /// Read-only snapshot, if the key exists and has not expired.
    async fn peek(&self, key: &str, now_ms: u64) -> Result<Option<TokenBucket>>;
}

fn refill_and_consume(bucket: &mut TokenBucket, args: &ConsumeArgs<'_>) -> (u64, bool) {
    bucket.capacity = args.capacity;
    bucket.refill_rate = args.refill_rate;

    if args.paid {
        // Paid tier: top up to the multiplied ceiling at access time, no
        // time-based refill.
        bucket.tokens = (args.capacity * args.cap_multiplier.max(1)) as f64;
    } else {
        // Any paid-tier overage is clipped before the normal refill step.
        bucket.tokens = bucket.tokens.min(args.capacity as f64);
        let elapsed_ms = args.now_ms.saturating_sub(bucket.last_refill_ms);
        let refill = elapsed_ms as f64 * args.refill_rate as f64 / 1000.0;
        bucket.tokens = (bucket.tokens + refill).min(args.capacity as f64);
    }
    bucket.last_refill_ms = args.now_ms;

    let needed = bucket.tokens_needed(args.requested);
    if bucket.tokens >= needed as f64 {
        bucket.tokens -= needed as f64;
        (needed, true)
    } else {
        (0, false)
    }
}

struct StoredBucket {
    bucket: TokenBucket,
    expires_at_ms: u64,
}

/// Process-local [`BucketStore`]. Entries expire after their TTL and are
/// recreated on the next access, mirroring the distributed store's behavior.
#[derive(Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, StoredBucket>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl BucketStore for MemoryBucketStore {
    async fn get_or_create_and_consume(&self, args: ConsumeArgs<'_>) -> Result<ConsumeOutcome> {
        let mut entry = self
            .buckets
            .entry(args.key.to_string())
            .or_insert_with(|| StoredBucket {
                bucket: TokenBucket::new(args.key, args.capacity, args.refill_rate, args.now_ms),
                expires_at_ms: args.now_ms + args.ttl_secs * 1000,
            });

        if entry.expires_at_ms <= args.now_ms {
            entry.bucket = TokenBucket::new(args.key, args.capacity, args.refill_rate, args.now_ms);
        }

        let (consumed, success) = refill_and_consume(&mut entry.bucket, &args);
        entry.expires_at_ms = args.now_ms + args.ttl_secs * 1000;

        Ok(ConsumeOutcome {
            bucket: entry.bucket.clone(),
            consumed,
            success,
        })
    }

    async fn consume_tokens(
        &self,
        key: &str,
        tokens: i64,
        now_ms: u64,
        ttl_secs: u64,
        content_length: Option<u64>,
    ) -> Result<TokenBucket> {
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| StoredBucket {
                bucket: TokenBucket::new(key, 0, 0, now_ms),
                expires_at_ms: now_ms + ttl_secs * 1000,
            });

        entry.bucket.tokens -= tokens as f64;
        if content_length.is_some() {
            entry.bucket.content_length = content_length;
        }
        entry.expires_at_ms = now_ms + ttl_secs * 1000;

        Ok(entry.bucket.clone())
    }

    async fn peek(&self, key: &str, now_ms: u64) -> Result<Option<TokenBucket>> {
        Ok(self
            .buckets
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.bucket.clone()))
    }
}
