//! The tick planner.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quillcast_core::{calendar, TenantId};
use quillcast_ratelimit::QuotaConfig;
use quillcast_tenants::{Tenant, TenantRegistry};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::claim::{ClaimSet, TenantClaim};

/// One unit of dispatched work: a tenant snapshot plus the claim that
/// keeps the tenant out of later ticks until the item completes.
pub struct WorkItem {
    pub tenant: Arc<Tenant>,
    pub claim: TenantClaim,
}

/// Output of one tick.
pub struct TickPlan {
    pub items: Vec<WorkItem>,
    /// How long the engine may sleep if nothing else wakes it: the
    /// nearest window opening or daily reset, capped by the poll
    /// interval.
    pub next_wakeup: Duration,
}

/// Plans work for the pool. Holds read references only; tenant state is
/// owned by the registry and mutated through it.
pub struct Scheduler {
    registry: Arc<TenantRegistry>,
    claims: ClaimSet,
    quotas: QuotaConfig,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TenantRegistry>,
        claims: ClaimSet,
        quotas: QuotaConfig,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            claims,
            quotas,
            poll_interval,
        }
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Produces work items for idle workers.
    ///
    /// Eligibility: active, inside the posting window at `now_wall`,
    /// daily counters under both per-tenant limits, and unclaimed.
    /// Ordering: ascending `last_acted_at` with never-acted tenants
    /// first, ties broken by a stable hash of the id. The drain stops at
    /// `idle_workers` items and never exceeds the remaining global
    /// daily budget.
    pub fn plan(
        &self,
        now_wall: DateTime<Utc>,
        idle_workers: usize,
        global_llm_remaining: f64,
    ) -> TickPlan {
        let mut eligible: Vec<Arc<Tenant>> = Vec::new();
        let mut wake_at: Option<DateTime<Utc>> = None;
        let mut note_wakeup = |candidate: Option<DateTime<Utc>>| {
            if let Some(at) = candidate {
                wake_at = Some(match wake_at {
                    Some(current) if current <= at => current,
                    _ => at,
                });
            }
        };

        for tenant in self.registry.list_active() {
            if self.claims.is_claimed(&tenant.id) {
                continue;
            }
            if !tenant.in_posting_window(now_wall) {
                let windows = tenant.posting_windows.clone();
                note_wakeup(calendar::next_local_hour_match(
                    now_wall,
                    tenant.timezone,
                    |h| windows.contains(h),
                ));
                continue;
            }
            let counters = tenant.counters_at(now_wall);
            if counters.llm_calls >= self.quotas.client_daily_llm()
                || counters.posts >= self.quotas.client_daily_posts()
            {
                note_wakeup(Some(calendar::next_local_midnight(
                    now_wall,
                    tenant.timezone,
                )));
                continue;
            }
            eligible.push(tenant);
        }

        eligible.sort_by_key(|t| (t.last_acted_at.map(|a| a.mono), stable_id_hash(&t.id)));

        let budget = idle_workers.min(global_llm_remaining.max(0.0) as usize);
        let mut items = Vec::new();
        for tenant in eligible.into_iter().take(budget) {
            if let Some(claim) = self.claims.try_claim(&tenant.id) {
                trace!(tenant = %tenant.id, "dispatching work item");
                items.push(WorkItem { tenant, claim });
            }
        }

        let next_wakeup = wake_at
            .map(|at| calendar::until(now_wall, at))
            .unwrap_or(self.poll_interval)
            .min(self.poll_interval);

        TickPlan { items, next_wakeup }
    }
}

/// First eight bytes of `Sha256(id)`, big-endian. Stable across runs,
/// which keeps selection deterministic for testing.
fn stable_id_hash(id: &TenantId) -> u64 {
    let digest = Sha256::digest(id.as_str().as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
