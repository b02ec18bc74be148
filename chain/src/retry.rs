//! Retry wrapper with exponential backoff, and the leaky token bucket that
//! throttles trusted-node traffic.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ChainError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

/// Runs `op` until it succeeds, the error is non-retryable, or the retry
/// budget is spent. Delays double per attempt; `on_retry` observes each
/// failure before the backoff sleep.
pub async fn with_retries<T, F, Fut, C>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
    mut on_retry: C,
) -> Result<T, ChainError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
    C: FnMut(u32, &ChainError),
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.retries {
                    return Err(err);
                }
                on_retry(attempt, &err);
                let delay = policy.base_delay * 2u32.saturating_pow(attempt.min(16));
                warn!(label, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Leaky token bucket in front of the trusted node. Refills once per second
/// up to a five-minute burst; callers block (with a short poll) while the
/// bucket is empty. Upstream 429s are penalized by `2^attempt` tokens.
pub struct TrustedNodeThrottle {
    tokens: Arc<AtomicI64>,
    stop_tx: watch::Sender<bool>,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

/// Burst window, in seconds of refill.
const BURST_SECONDS: i64 = 300;

impl TrustedNodeThrottle {
    pub fn start(max_requests_per_second: u64, poll_interval: Duration) -> Self {
        let rate = max_requests_per_second.max(1) as i64;
        let max_tokens = rate * BURST_SECONDS;
        let tokens = Arc::new(AtomicI64::new(rate));

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let refill_tokens = tokens.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.tick().await; // the first tick completes immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = refill_tokens.fetch_update(
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                            |current| Some((current + rate).min(max_tokens)),
                        );
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });

        TrustedNodeThrottle {
            tokens,
            stop_tx,
            handle: parking_lot::Mutex::new(Some(handle)),
            poll_interval,
        }
    }

    /// Takes one token, waiting while the bucket is empty or negative.
    pub async fn acquire(&self) {
        loop {
            let previous = self.tokens.fetch_sub(1, Ordering::SeqCst);
            if previous > 0 {
                return;
            }
            // Undo the claim and poll until the refill task catches up.
            self.tokens.fetch_add(1, Ordering::SeqCst);
            debug!("trusted node bucket empty, waiting for refill");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Charges an upstream 429 against the bucket.
    pub fn penalize(&self, attempt: u32) {
        self.tokens
            .fetch_sub(1i64 << attempt.min(20), Ordering::SeqCst);
    }

    pub fn available(&self) -> i64 {
        self.tokens.load(Ordering::SeqCst)
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
