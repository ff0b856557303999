// =============================================================================
// Request-Weight Budget — token bucket for the per-minute weight ceiling
// =============================================================================
//
// Binance allows ~1200 request weight per minute. Every REST call declares its
// weight and acquires tokens before sending; when the bucket is empty the
// caller blocks until refill, bounded by a deadline. The actual used weight
// reported by the `X-MBX-USED-WEIGHT-1M` response header is synced back so the
// local bucket never drifts optimistic.
// =============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::binance::error::{GatewayError, GatewayResult};

/// Default per-minute weight ceiling. We keep a safety margin under the
/// venue's 1200.
pub const DEFAULT_WEIGHT_PER_MIN: u32 = 1100;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by every REST call through the gateway.
pub struct WeightBudget {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

/// Serialisable snapshot of the current budget state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightSnapshot {
    pub available: u32,
    pub capacity: u32,
}

impl WeightBudget {
    pub fn new(weight_per_min: u32) -> Self {
        let capacity = weight_per_min as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity / 60.0,
        }
    }

    /// Take `weight` tokens, blocking until they become available. Fails with
    /// `RateLimited` if the wait would exceed `deadline`.
    pub async fn acquire(&self, weight: u32, deadline: Duration) -> GatewayResult<()> {
        let requested = weight as f64;
        if requested > self.capacity {
            return Err(GatewayError::RateLimited(format!(
                "requested weight {weight} exceeds bucket capacity {}",
                self.capacity
            )));
        }

        let started = Instant::now();
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= requested {
                    bucket.tokens -= requested;
                    return Ok(());
                }

                // Seconds until enough tokens accumulate.
                let deficit = requested - bucket.tokens;
                Duration::from_secs_f64(deficit / self.refill_per_sec)
            };

            let elapsed = started.elapsed();
            if elapsed + wait > deadline {
                warn!(
                    weight,
                    wait_ms = wait.as_millis() as u64,
                    deadline_ms = deadline.as_millis() as u64,
                    "weight budget exhausted within deadline"
                );
                return Err(GatewayError::RateLimited(format!(
                    "weight budget exhausted: need {weight}, refill in {:?}",
                    wait
                )));
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Sync the bucket from the used-weight value reported by the exchange.
    /// The exchange view wins when it is more pessimistic than ours.
    pub async fn sync_used_weight(&self, used: u32) {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        let remote_remaining = (self.capacity - used as f64).max(0.0);
        if remote_remaining < bucket.tokens {
            debug!(
                used,
                local = bucket.tokens as u32,
                remote = remote_remaining as u32,
                "weight bucket corrected from response header"
            );
            bucket.tokens = remote_remaining;
        }
    }

    pub async fn snapshot(&self) -> WeightSnapshot {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        WeightSnapshot {
            available: bucket.tokens as u32,
            capacity: self.capacity as u32,
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}

impl Default for WeightBudget {
    fn default() -> Self {
        Self::new(DEFAULT_WEIGHT_PER_MIN)
    }
}

impl std::fmt::Debug for WeightBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightBudget")
            .field("capacity", &self.capacity)
            .field("refill_per_sec", &self.refill_per_sec)
            .finish()
    }
}
