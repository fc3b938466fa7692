//! Token bucket implementation.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Mutable part of a bucket, always accessed under the bucket's lock.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    /// Tokens available at `now`, capped at `capacity`.
    fn refilled(&self, now: Instant, capacity: f64, rate: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * rate).min(capacity)
    }
}

/// A continuously refilling token bucket.
///
/// Refill is computed lazily on access; there is no background timer. The
/// refill and consume steps run under one lock so concurrent consumers can
/// never take more tokens than the bucket holds.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens the bucket can hold
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

/// Point-in-time view of a bucket, used for metrics reporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub available_tokens: f64,
    pub capacity: f64,
    pub rate_per_second: f64,
}

impl TokenBucket {
    /// Create a new bucket that starts full.
    pub fn new(refill_rate: f64, capacity: f64) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            capacity,
            refill_rate: refill_rate.max(0.0),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take `tokens` from the bucket.
    ///
    /// The refill timestamp advances whether or not the request succeeds.
    /// Returns `true` if the tokens were taken.
    pub fn try_consume(&self, tokens: u32) -> bool {
        let requested = f64::from(tokens);
        let mut state = self.state.lock();

        let now = Instant::now();
        state.tokens = state.refilled(now, self.capacity, self.refill_rate);
        state.last_refill = now;

        if state.tokens >= requested {
            state.tokens -= requested;
            true
        } else {
            false
        }
    }

    /// Tokens that would be available right now, without mutating the bucket.
    pub fn peek_available(&self) -> f64 {
        let state = self.state.lock();
        state.refilled(Instant::now(), self.capacity, self.refill_rate)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            available_tokens: self.peek_available(),
            capacity: self.capacity,
            rate_per_second: self.refill_rate,
        }
    }
}
