// src/limiter.rs
//! Token bucket shared by every fetch of one run.
//!
//! Tokens refill continuously at `rate` per second up to `capacity`; the
//! bucket starts full so a burst of `capacity / cost` fetches is admitted
//! immediately. Deduction happens in one step under the lock, so a caller
//! that gives up while waiting never leaves a partial deduction behind.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{PipelineError, Result};

// Float drift after a refill sleep is absorbed by one more short wait.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate` is tokens per second; both values must be positive and finite.
    pub fn new(rate: f64, capacity: f64) -> Result<Self> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(PipelineError::InvalidLimiter(format!(
                "rate must be positive, got {rate}"
            )));
        }
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(PipelineError::InvalidLimiter(format!(
                "capacity must be positive, got {capacity}"
            )));
        }
        Ok(Self {
            rate,
            capacity,
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Rejects a cost that could never be admitted.
    pub fn check_cost(&self, cost: f64) -> Result<()> {
        if !(cost.is_finite() && cost > 0.0) {
            return Err(PipelineError::InvalidLimiter(format!(
                "cost must be positive, got {cost}"
            )));
        }
        if cost > self.capacity {
            return Err(PipelineError::LimiterMisconfigured {
                cost,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Waits until `cost` tokens are available, then takes them.
    pub async fn admit(&self, cost: f64) -> Result<()> {
        self.check_cost(cost)?;

        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= cost {
                    bucket.tokens -= cost;
                    return Ok(());
                }

                let deficit = cost - bucket.tokens;
                Duration::from_secs_f64(deficit / self.rate).max(MIN_WAIT)
            };

            // Lock is released while sleeping so other callers can check too.
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently in the bucket (after refill).
    pub async fn available(&self) -> f64 {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
