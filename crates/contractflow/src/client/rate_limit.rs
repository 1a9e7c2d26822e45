//! Token bucket rate limiter shared by every call made through one client.
//!
//! The bucket holds `capacity` tokens and refills to full once `period` has
//! elapsed since the last refill. Refill is computed lazily on acquire.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ClientError;

pub struct TokenBucket {
    capacity: u32,
    period: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket. A capacity of zero is treated as one.
    pub fn new(capacity: u32, period: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            period,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Takes one token, suspending until the next refill instant when the
    /// bucket is empty. The lock is never held across the wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        loop {
            let refill_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                if now.duration_since(state.last_refill) >= self.period {
                    state.tokens = self.capacity;
                    state.last_refill = now;
                }
                if state.tokens > 0 {
                    state.tokens -= 1;
                    return Ok(());
                }
                state.last_refill + self.period
            };

            debug!(
                wait_ms = refill_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limit reached, waiting for refill"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep_until(refill_at) => {}
            }
        }
    }

    /// Tokens left right now, after any due refill.
    pub async fn available(&self) -> u32 {
        let state = self.state.lock().await;
        if state.last_refill.elapsed() >= self.period {
            self.capacity
        } else {
            state.tokens
        }
    }
}
