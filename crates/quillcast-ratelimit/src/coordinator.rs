//! Multi-bucket admission decisions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use quillcast_core::TenantId;
use tracing::{debug, warn};

use crate::bucket::BucketParams;
use crate::config::QuotaConfig;
use crate::key::BucketKey;
use crate::store::CounterStore;

/// Outcome of an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// All buckets in the chain admitted; proceed.
    Admit,
    /// Some bucket (or the store itself) said no; come back after the
    /// given wait.
    Defer(Duration),
}

impl Decision {
    pub fn is_admit(&self) -> bool {
        matches!(self, Decision::Admit)
    }
}

/// Composes the quota buckets relevant to one decision site into a
/// single admit-or-defer answer.
///
/// Buckets are consumed coarsest-first (global, then per-tenant daily,
/// then per-tenant pacing); on rejection the already-consumed prefix is
/// refunded in reverse, best-effort.
pub struct RateLimitCoordinator {
    store: Arc<dyn CounterStore>,
    config: QuotaConfig,
}

impl RateLimitCoordinator {
    pub fn new(store: Arc<dyn CounterStore>, config: QuotaConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &QuotaConfig {
        &self.config
    }

    fn llm_chain(&self, tenant: &TenantId) -> Vec<(BucketKey, BucketParams)> {
        vec![
            (
                BucketKey::LlmDayGlobal,
                BucketParams::daily(self.config.global_daily_llm),
            ),
            (
                BucketKey::LlmDay(tenant.clone()),
                BucketParams::daily(self.config.client_daily_llm),
            ),
            (
                BucketKey::LlmSecond(tenant.clone()),
                BucketParams::pacing(self.config.client_llm_per_sec),
            ),
        ]
    }

    async fn admit_chain(
        &self,
        chain: &[(BucketKey, BucketParams)],
        now_secs: f64,
    ) -> Decision {
        let mut consumed = 0usize;

        for (key, params) in chain {
            match self.store.consume(key, *params, 1.0, now_secs).await {
                Ok(outcome) if outcome.admitted => consumed += 1,
                Ok(outcome) => {
                    debug!(bucket = %key, retry_after = ?outcome.retry_after, "bucket rejected");
                    self.refund_prefix(chain, consumed, now_secs).await;
                    // Never defer for zero; a rejection always means some wait.
                    let wait = outcome.retry_after.max(Duration::from_millis(10));
                    return Decision::Defer(wait);
                }
                Err(err) => {
                    warn!(bucket = %key, error = %err, "counter store unreachable, deferring");
                    self.refund_prefix(chain, consumed, now_secs).await;
                    return Decision::Defer(self.config.default_backoff);
                }
            }
        }
        Decision::Admit
    }

    async fn refund_prefix(&self, chain: &[(BucketKey, BucketParams)], consumed: usize, now_secs: f64) {
        for (key, params) in chain[..consumed].iter().rev() {
            if let Err(err) = self.store.refund(key, *params, 1.0, now_secs).await {
                warn!(bucket = %key, error = %err, "refund failed");
            }
        }
    }

    /// Admission for one LLM call on behalf of `tenant`.
    pub async fn admit_llm(&self, tenant: &TenantId, now_secs: f64) -> Decision {
        self.admit_chain(&self.llm_chain(tenant), now_secs).await
    }

    /// Admission for one publish on behalf of `tenant`.
    pub async fn admit_post(&self, tenant: &TenantId, now_secs: f64) -> Decision {
        let chain = [(
            BucketKey::PostDay(tenant.clone()),
            BucketParams::daily(self.config.client_daily_posts),
        )];
        self.admit_chain(&chain, now_secs).await
    }

    /// Re-seeds the tenant's pacing bucket from a backend `retry_after`
    /// hint so the scheduler will not reselect the tenant early.
    pub async fn penalize_llm_pacing(
        &self,
        tenant: &TenantId,
        retry_after: Duration,
        now_secs: f64,
    ) {
        let key = BucketKey::LlmSecond(tenant.clone());
        let params = BucketParams::pacing(self.config.client_llm_per_sec);
        if let Err(err) = self.store.penalize(&key, params, retry_after, now_secs).await {
            warn!(bucket = %key, error = %err, "failed to apply retry_after hint");
        }
    }

    /// Tokens left in the global daily bucket, or `None` when the store
    /// cannot be reached. Feeds the scheduler's drain loop.
    pub async fn global_llm_remaining(&self, now_secs: f64) -> Option<f64> {
        let params = BucketParams::daily(self.config.global_daily_llm);
        self.store
            .remaining(&BucketKey::LlmDayGlobal, params, now_secs)
            .await
            .ok()
    }

    /// Remaining tokens for every bucket relevant to `tenants`, keyed by
    /// the rendered bucket name. Feeds the health snapshot.
    pub async fn remaining_by_key(
        &self,
        tenants: &[TenantId],
        now_secs: f64,
    ) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        let mut keys = vec![(
            BucketKey::LlmDayGlobal,
            BucketParams::daily(self.config.global_daily_llm),
        )];
        for tenant in tenants {
            keys.push((
                BucketKey::LlmDay(tenant.clone()),
                BucketParams::daily(self.config.client_daily_llm),
            ));
            keys.push((
                BucketKey::LlmSecond(tenant.clone()),
                BucketParams::pacing(self.config.client_llm_per_sec),
            ));
            keys.push((
                BucketKey::PostDay(tenant.clone()),
                BucketParams::daily(self.config.client_daily_posts),
            ));
        }
        for (key, params) in keys {
            if let Ok(tokens) = self.store.remaining(&key, params, now_secs).await {
                out.insert(key.to_string(), tokens);
            }
        }
        out
    }
}
