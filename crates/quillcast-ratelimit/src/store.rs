//! Counter-store interface and the in-memory implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::bucket::{self, BucketParams, BucketState, ConsumeOutcome};
use crate::error::StoreError;
use crate::key::BucketKey;

/// Shared, atomic storage for token-bucket state.
///
/// Every operation must be atomic per key: concurrent consumers of the
/// same bucket observe a serial order. The in-memory implementation
/// locks; a networked implementation would evaluate the bucket
/// arithmetic server-side (e.g. a Lua script) to get the same property.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Refill-then-consume `cost` tokens at `key`.
    async fn consume(
        &self,
        key: &BucketKey,
        params: BucketParams,
        cost: f64,
        now_secs: f64,
    ) -> Result<ConsumeOutcome, StoreError>;

    /// Best-effort re-credit after a partially admitted bucket chain.
    async fn refund(
        &self,
        key: &BucketKey,
        params: BucketParams,
        cost: f64,
        now_secs: f64,
    ) -> Result<(), StoreError>;

    /// Debit the bucket so a unit consume defers for `unavailable_for`.
    async fn penalize(
        &self,
        key: &BucketKey,
        params: BucketParams,
        unavailable_for: Duration,
        now_secs: f64,
    ) -> Result<(), StoreError>;

    /// Read-only token count after refill; feeds health and metrics.
    async fn remaining(
        &self,
        key: &BucketKey,
        params: BucketParams,
        now_secs: f64,
    ) -> Result<f64, StoreError>;
}

/// Process-local counter store.
///
/// Suitable for single-process deployments and tests. TTL reclamation is
/// lazy: expired state is replaced on next access, and `prune` drops
/// anything a sweep finds expired.
pub struct MemoryCounterStore {
    buckets: Mutex<HashMap<String, BucketState>>,
    unavailable: AtomicBool,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulates an unreachable store. Test hook.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops buckets whose state has outlived `ttl` as of `now_secs`.
    pub fn prune(&self, ttl: Duration, now_secs: f64) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, state| now_secs - state.last_refill < ttl.as_secs_f64());
        before - buckets.len()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn consume(
        &self,
        key: &BucketKey,
        params: BucketParams,
        cost: f64,
        now_secs: f64,
    ) -> Result<ConsumeOutcome, StoreError> {
        self.check_available()?;
        let mut buckets = self.buckets.lock();
        let state = buckets.get(&key.to_string()).copied();
        let (next, outcome) = bucket::apply_consume(state, params, cost, now_secs);
        buckets.insert(key.to_string(), next);
        Ok(outcome)
    }

    async fn refund(
        &self,
        key: &BucketKey,
        params: BucketParams,
        cost: f64,
        now_secs: f64,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut buckets = self.buckets.lock();
        let state = buckets.get(&key.to_string()).copied();
        let next = bucket::apply_refund(state, params, cost, now_secs);
        buckets.insert(key.to_string(), next);
        Ok(())
    }

    async fn penalize(
        &self,
        key: &BucketKey,
        params: BucketParams,
        unavailable_for: Duration,
        now_secs: f64,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut buckets = self.buckets.lock();
        let state = buckets.get(&key.to_string()).copied();
        let next = bucket::apply_penalty(state, params, unavailable_for, now_secs);
        buckets.insert(key.to_string(), next);
        Ok(())
    }

    async fn remaining(
        &self,
        key: &BucketKey,
        params: BucketParams,
        now_secs: f64,
    ) -> Result<f64, StoreError> {
        self.check_available()?;
        let buckets = self.buckets.lock();
        let state = buckets.get(&key.to_string()).copied();
        // Refill without persisting; read-only.
        let (next, _) = bucket::apply_consume(state, params, 0.0, now_secs);
        Ok(next.tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quillcast_core::TenantId;

    fn key() -> BucketKey {
        BucketKey::LlmSecond(TenantId::new("t1"))
    }

    #[tokio::test]
    async fn consume_then_deny_then_refill() {
        let store = MemoryCounterStore::new();
        let params = BucketParams::pacing(1.0);

        let first = store.consume(&key(), params, 1.0, 100.0).await.unwrap();
        assert!(first.admitted);

        let second = store.consume(&key(), params, 1.0, 100.2).await.unwrap();
        assert!(!second.admitted);
        assert!(second.retry_after > Duration::ZERO);

        let third = store.consume(&key(), params, 1.0, 101.2).await.unwrap();
        assert!(third.admitted);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_store_error() {
        let store = MemoryCounterStore::new();
        store.set_unavailable(true);
        let err = store
            .consume(&key(), BucketParams::pacing(1.0), 1.0, 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn prune_reclaims_expired_buckets() {
        let store = MemoryCounterStore::new();
        let params = BucketParams::daily(10);
        store.consume(&key(), params, 1.0, 0.0).await.unwrap();
        assert_eq!(store.len(), 1);

        let removed = store.prune(params.ttl, params.ttl.as_secs_f64() + 1.0);
        assert_eq!(removed, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remaining_does_not_consume() {
        let store = MemoryCounterStore::new();
        let params = BucketParams::daily(10);
        let r1 = store.remaining(&key(), params, 0.0).await.unwrap();
        let r2 = store.remaining(&key(), params, 0.0).await.unwrap();
        assert_eq!(r1, 10.0);
        assert_eq!(r2, 10.0);
    }
}
