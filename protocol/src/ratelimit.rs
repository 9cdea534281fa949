//! Token-bucket rate limiter.
//!
//! Shared by the district-registry client and the submission endpoint. The
//! bucket balance is observable through [`TokenBucket::remaining`], and
//! `consume` decrements it under the same lock that admits the call — the
//! two can never disagree.

use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `capacity` whole tokens, refilled continuously at `refill_per_sec`.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token. Returns `false` (and leaves the balance untouched)
    /// when the bucket is empty.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u32 {
        let state = self.state.lock().expect("rate limiter lock poisoned");
        state.tokens.floor() as u32
    }
}
