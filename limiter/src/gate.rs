//! Per-request limiter integration: predict a request's token cost up
//! front, gate it through both buckets, and reconcile with the true byte
//! count once the response has streamed.

use std::net::IpAddr;

use eyre::Result;
use tracing::debug;

use crate::allowlist::{client_ip_candidates, IpAllowList};
use crate::bucket::{BucketStore, ConsumeArgs, TOKEN_BYTES};
use crate::keys::{ip_key, resource_key};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub resource_capacity: u64,
    pub resource_refill_rate: u64,
    pub ip_capacity: u64,
    pub ip_refill_rate: u64,
    pub ttl_secs: u64,
    pub paid_cap_multiplier: u64,
    pub paid_refill_multiplier: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            enabled: true,
            resource_capacity: 500,
            resource_refill_rate: 50,
            ip_capacity: 2000,
            ip_refill_rate: 200,
            ttl_secs: 60,
            paid_cap_multiplier: 10,
            paid_refill_multiplier: 10,
        }
    }
}

/// The addresses a request arrived with.
#[derive(Debug, Clone, Default)]
pub struct ClientAddr<'a> {
    pub forwarded_for: Option<&'a str>,
    pub real_ip: Option<&'a str>,
    pub socket_peer: Option<IpAddr>,
}

/// A granted request's billing handle, passed back at stream end.
#[derive(Debug, Clone)]
pub struct RequestCharge {
    resource_key: String,
    ip_key: Option<String>,
    predicted_tokens: u64,
    /// False when limits are disabled; the settle path then only records the
    /// observed content length.
    gated: bool,
    /// Allow-listed requests leave no bucket records at all.
    bypass: bool,
}

impl RequestCharge {
    pub fn predicted_tokens(&self) -> u64 {
        self.predicted_tokens
    }
}

#[derive(Debug)]
pub enum GateDecision {
    Allowed(RequestCharge),
    ResourceLimited,
    IpLimited,
}

impl GateDecision {
    /// Body for the 429 response, distinguishing which limit was hit.
    pub fn reject_message(&self) -> Option<&'static str> {
        match self {
            GateDecision::Allowed(_) => None,
            GateDecision::ResourceLimited => Some("Resource rate limit exceeded"),
            GateDecision::IpLimited => Some("IP rate limit exceeded"),
        }
    }
}

pub struct RateLimiter<S> {
    store: S,
    config: RateLimitConfig,
    allow_list: IpAllowList,
}

impl<S: BucketStore> RateLimiter<S> {
    pub fn new(store: S, config: RateLimitConfig, allow_list: IpAllowList) -> Self {
        RateLimiter {
            store,
            config,
            allow_list,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Gate one request. The resource bucket is consulted first, then the IP
    /// bucket; either shortfall rejects the request without touching the
    /// other bucket again.
    pub async fn check(
        &self,
        method: &str,
        host: &str,
        path: &str,
        client: &ClientAddr<'_>,
        paid: bool,
        now_ms: u64,
    ) -> Result<GateDecision> {
        let candidates =
            client_ip_candidates(client.forwarded_for, client.real_ip, client.socket_peer);
        let rkey = resource_key(method, host, path);

        if self.allow_list.any_allowed(&candidates) {
            debug!(key = %rkey, "allow-listed client bypasses rate limits");
            return Ok(GateDecision::Allowed(RequestCharge {
                resource_key: rkey,
                ip_key: None,
                predicted_tokens: 0,
                gated: false,
                bypass: true,
            }));
        }

        let ikey = candidates.first().map(ip_key);

        if !self.config.enabled {
            return Ok(GateDecision::Allowed(RequestCharge {
                resource_key: rkey,
                ip_key: ikey,
                predicted_tokens: 0,
                gated: false,
                bypass: false,
            }));
        }

        let resource = self
            .store
            .get_or_create_and_consume(ConsumeArgs {
                key: &rkey,
                capacity: self.config.resource_capacity,
                refill_rate: self.config.resource_refill_rate,
                now_ms,
                ttl_secs: self.config.ttl_secs,
                requested: 1,
                paid,
                cap_multiplier: self.config.paid_cap_multiplier,
                refill_multiplier: self.config.paid_refill_multiplier,
            })
            .await?;
        if !resource.success {
            return Ok(GateDecision::ResourceLimited);
        }
        let predicted = resource.consumed;

        if let Some(ikey) = &ikey {
            let ip = self
                .store
                .get_or_create_and_consume(ConsumeArgs {
                    key: ikey,
                    capacity: self.config.ip_capacity,
                    refill_rate: self.config.ip_refill_rate,
                    now_ms,
                    ttl_secs: self.config.ttl_secs,
                    requested: predicted.max(1),
                    paid,
                    cap_multiplier: self.config.paid_cap_multiplier,
                    refill_multiplier: self.config.paid_refill_multiplier,
                })
                .await?;
            if !ip.success {
                return Ok(GateDecision::IpLimited);
            }
        }

        Ok(GateDecision::Allowed(RequestCharge {
            resource_key: rkey,
            ip_key: ikey,
            predicted_tokens: predicted,
            gated: true,
            bypass: false,
        }))
    }

    /// Reconcile the prediction with the bytes actually streamed. May drive
    /// buckets negative when a response ran larger than predicted.
    pub async fn settle(
        &self,
        charge: &RequestCharge,
        response_bytes: u64,
        now_ms: u64,
    ) -> Result<()> {
        if charge.bypass {
            return Ok(());
        }

        let actual_tokens = response_bytes.div_ceil(TOKEN_BYTES);

        if !charge.gated {
            // Limits disabled: keep the content length memo warm anyway.
            self.store
                .consume_tokens(
                    &charge.resource_key,
                    0,
                    now_ms,
                    self.config.ttl_secs,
                    Some(response_bytes),
                )
                .await?;
            return Ok(());
        }

        if actual_tokens != charge.predicted_tokens {
            let delta = actual_tokens as i64 - charge.predicted_tokens as i64;
            debug!(
                key = %charge.resource_key,
                predicted = charge.predicted_tokens,
                actual = actual_tokens,
                "adjusting bucket by post-response delta"
            );
            self.store
                .consume_tokens(
                    &charge.resource_key,
                    delta,
                    now_ms,
                    self.config.ttl_secs,
                    Some(response_bytes),
                )
                .await?;
            if let Some(ikey) = &charge.ip_key {
                self.store
                    .consume_tokens(ikey, delta, now_ms, self.config.ttl_secs, None)
                    .await?;
            }
        } else {
            self.store
                .consume_tokens(
                    &charge.resource_key,
                    0,
                    now_ms,
                    self.config.ttl_secs,
                    Some(response_bytes),
                )
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBucketStore;

    fn limiter(config: RateLimitConfig, allow: &[&str]) -> RateLimiter<MemoryBucketStore> {
        let entries: Vec<String> = allow.iter().map(|s| s.to_string()).collect();
        RateLimiter::new(
            MemoryBucketStore::new(),
            config,
            IpAllowList::new(&entries).unwrap(),
        )
    }

    fn client(socket: &str) -> ClientAddr<'static> {
        ClientAddr {
            forwarded_for: None,
            real_ip: None,
            socket_peer: Some(socket.parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn allow_listed_requests_leave_no_records() {
        let limiter = limiter(RateLimitConfig::default(), &["10.0.0.0/8"]);
        let decision = limiter
            .check("GET", "gw", "/tx/x", &client("10.1.2.3"), false, 0)
            .await
            .unwrap();
        let charge = match decision {
            GateDecision::Allowed(charge) => charge,
            other => panic!("expected allow, got {other:?}"),
        };
        limiter.settle(&charge, 1 << 20, 10).await.unwrap();
        assert!(limiter.store().is_empty());
    }

    #[tokio::test]
    async fn resource_exhaustion_rejects_with_the_resource_message() {
        let config = RateLimitConfig {
            resource_capacity: 2,
            resource_refill_rate: 0,
            ..Default::default()
        };
        let limiter = limiter(config, &[]);
        let c = client("1.2.3.4");
        for _ in 0..2 {
            let decision = limiter.check("GET", "gw", "/p", &c, false, 0).await.unwrap();
            assert!(matches!(decision, GateDecision::Allowed(_)));
        }
        let decision = limiter.check("GET", "gw", "/p", &c, false, 0).await.unwrap();
        assert_eq!(
            decision.reject_message(),
            Some("Resource rate limit exceeded")
        );
    }

    #[tokio::test]
    async fn ip_exhaustion_rejects_with_the_ip_message() {
        let config = RateLimitConfig {
            ip_capacity: 0,
            ip_refill_rate: 0,
            ..Default::default()
        };
        let limiter = limiter(config, &[]);
        let decision = limiter
            .check("GET", "gw", "/p", &client("1.2.3.4"), false, 0)
            .await
            .unwrap();
        assert_eq!(decision.reject_message(), Some("IP rate limit exceeded"));
    }

    #[tokio::test]
    async fn settlement_trains_the_next_prediction() {
        let limiter = limiter(RateLimitConfig::default(), &[]);
        let c = client("1.2.3.4");

        // First request is predicted at 1 token; the 5 KiB response costs 5.
        let decision = limiter.check("GET", "gw", "/big", &c, false, 0).await.unwrap();
        let charge = match decision {
            GateDecision::Allowed(charge) => charge,
            other => panic!("expected allow, got {other:?}"),
        };
        assert_eq!(charge.predicted_tokens(), 1);
        limiter.settle(&charge, 5 * 1024, 100).await.unwrap();

        // The next request is charged from the memo.
        let decision = limiter
            .check("GET", "gw", "/big", &c, false, 200)
            .await
            .unwrap();
        let charge = match decision {
            GateDecision::Allowed(charge) => charge,
            other => panic!("expected allow, got {other:?}"),
        };
        assert_eq!(charge.predicted_tokens(), 5);

        let bucket = limiter
            .store()
            .peek("{rl:GET:gw:/big}:resource", 201)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.content_length, Some(5 * 1024));
    }

    #[tokio::test]
    async fn disabled_limits_skip_the_gate_but_learn_content_lengths() {
        let config = RateLimitConfig {
            enabled: false,
            ..Default::default()
        };
        let limiter = limiter(config, &[]);
        let decision = limiter
            .check("GET", "gw", "/p", &client("1.2.3.4"), false, 0)
            .await
            .unwrap();
        let charge = match decision {
            GateDecision::Allowed(charge) => charge,
            other => panic!("expected allow, got {other:?}"),
        };
        limiter.settle(&charge, 3 * 1024, 10).await.unwrap();

        let bucket = limiter
            .store()
            .peek("{rl:GET:gw:/p}:resource", 11)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.content_length, Some(3 * 1024));
        assert_eq!(bucket.tokens, 0.0);
    }
}
