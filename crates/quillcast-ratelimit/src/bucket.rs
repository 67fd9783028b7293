//! Token-bucket arithmetic.
//!
//! The refill/consume math is a set of pure functions over a small
//! [`BucketState`], shared by every [`CounterStore`](crate::CounterStore)
//! implementation. The in-memory store applies it under a lock; a
//! Redis-style store would run the same arithmetic inside a server-side
//! script so the read-modify-write stays atomic.

use std::time::Duration;

/// Persisted state of one bucket: available tokens and the epoch-second
/// timestamp of the last refill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill: f64,
}

/// Static parameters of a bucket. Not persisted; every caller derives
/// them from configuration so the store stays schema-free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Maximum token count.
    pub capacity: f64,
    /// Continuous refill rate in tokens per second.
    pub refill_per_sec: f64,
    /// Idle lifetime after which stored state is discarded and the
    /// bucket starts full again.
    pub ttl: Duration,
}

impl BucketParams {
    /// Pacing bucket: `rate` tokens per second, burst of one.
    pub fn pacing(rate: f64) -> Self {
        Self {
            capacity: 1.0,
            refill_per_sec: rate,
            ttl: Duration::from_secs(3600),
        }
    }

    /// Daily quota bucket: `limit` tokens refilled evenly over 24 h,
    /// with a 48 h TTL so expired days reclaim themselves.
    pub fn daily(limit: u32) -> Self {
        Self {
            capacity: limit as f64,
            refill_per_sec: limit as f64 / 86_400.0,
            ttl: Duration::from_secs(48 * 3600),
        }
    }
}

/// Result of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeOutcome {
    /// True iff the bucket held at least `cost` tokens after refill.
    pub admitted: bool,
    /// Tokens left after the (possibly rejected) consume.
    pub remaining: f64,
    /// Time until the bucket will hold `cost` tokens; zero when admitted.
    pub retry_after: Duration,
}

/// Refills `state` up to `now`, treating state older than the TTL as
/// expired (the bucket restarts full).
fn refill(state: Option<BucketState>, params: BucketParams, now: f64) -> BucketState {
    match state {
        Some(s) if now - s.last_refill < params.ttl.as_secs_f64() => {
            let elapsed = (now - s.last_refill).max(0.0);
            BucketState {
                tokens: (s.tokens + elapsed * params.refill_per_sec).min(params.capacity),
                last_refill: now,
            }
        }
        _ => BucketState {
            tokens: params.capacity,
            last_refill: now,
        },
    }
}

fn time_until(tokens_needed: f64, params: BucketParams) -> Duration {
    if tokens_needed <= 0.0 {
        return Duration::ZERO;
    }
    if params.refill_per_sec <= 0.0 {
        return params.ttl;
    }
    Duration::from_secs_f64(tokens_needed / params.refill_per_sec)
}

/// Attempts to take `cost` tokens. Returns the new state to persist and
/// the outcome for the caller.
pub fn apply_consume(
    state: Option<BucketState>,
    params: BucketParams,
    cost: f64,
    now: f64,
) -> (BucketState, ConsumeOutcome) {
    let mut next = refill(state, params, now);
    if next.tokens >= cost {
        next.tokens -= cost;
        let outcome = ConsumeOutcome {
            admitted: true,
            remaining: next.tokens,
            retry_after: Duration::ZERO,
        };
        (next, outcome)
    } else {
        let outcome = ConsumeOutcome {
            admitted: false,
            remaining: next.tokens,
            retry_after: time_until(cost - next.tokens, params),
        };
        (next, outcome)
    }
}

/// Re-credits `cost` tokens, clamped to capacity. Best-effort undo for a
/// partially consumed bucket chain.
pub fn apply_refund(
    state: Option<BucketState>,
    params: BucketParams,
    cost: f64,
    now: f64,
) -> BucketState {
    let mut next = refill(state, params, now);
    next.tokens = (next.tokens + cost).min(params.capacity);
    next
}

/// Debits the bucket so a unit consume will not be admitted for at least
/// `unavailable_for`. Used to honour a backend's `retry_after` hint.
pub fn apply_penalty(
    state: Option<BucketState>,
    params: BucketParams,
    unavailable_for: Duration,
    now: f64,
) -> BucketState {
    let mut next = refill(state, params, now);
    let target = 1.0 - unavailable_for.as_secs_f64() * params.refill_per_sec;
    next.tokens = next.tokens.min(target);
    next
}
