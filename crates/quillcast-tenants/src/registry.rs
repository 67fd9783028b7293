//! In-memory tenant registry.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use quillcast_core::TenantId;
use tracing::{debug, warn};

use crate::error::{RegistryError, RepositoryError};
use crate::repository::Repository;
use crate::tenant::{ActedAt, Tenant};

/// What a completed work item contributes to tenant state.
#[derive(Debug, Clone, Copy)]
pub struct CompletionOutcome {
    pub acted_at: ActedAt,
    pub llm_calls: u32,
    pub posts: u32,
    pub llm_tokens: u64,
}

/// Read-optimized snapshots of all tenants, reconciled from the
/// repository on an interval.
///
/// The repository owns durable truth; the registry's snapshots are a
/// cache. Completion write-backs are batched in a dirty set and pushed
/// by [`TenantRegistry::flush`], which the reconciler loop calls
/// periodically and the engine calls before shutdown.
pub struct TenantRegistry {
    repo: Arc<dyn Repository>,
    snapshots: RwLock<HashMap<TenantId, Arc<Tenant>>>,
    dirty: Mutex<HashSet<TenantId>>,
}

impl TenantRegistry {
    /// Loads all tenants from the repository. Repository failure here
    /// is fatal for engine start-up.
    pub async fn load(repo: Arc<dyn Repository>) -> Result<Self, RepositoryError> {
        let tenants = repo.list_tenants().await?;
        let snapshots = tenants
            .into_iter()
            .map(|t| (t.id.clone(), Arc::new(t)))
            .collect();
        Ok(Self {
            repo,
            snapshots: RwLock::new(snapshots),
            dirty: Mutex::new(HashSet::new()),
        })
    }

    /// Snapshots of all active tenants, in stable id order.
    pub fn list_active(&self) -> Vec<Arc<Tenant>> {
        let snapshots = self.snapshots.read();
        let mut active: Vec<Arc<Tenant>> = snapshots
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn snapshot(&self, id: &TenantId) -> Option<Arc<Tenant>> {
        self.snapshots.read().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.snapshots.read().values().filter(|t| t.active).count()
    }

    /// Applies a completed work item to the tenant's snapshot: advances
    /// `last_acted_at` (strictly monotonic), rolls the daily counters to
    /// the completion's tenant-local day, and bumps them. The snapshot
    /// is queued for write-back.
    pub fn record_completion(
        &self,
        id: &TenantId,
        outcome: CompletionOutcome,
    ) -> Result<(), RegistryError> {
        {
            let mut snapshots = self.snapshots.write();
            let entry = snapshots
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownTenant(id.clone()))?;

            if let Some(prev) = entry.last_acted_at {
                if outcome.acted_at.mono <= prev.mono {
                    return Err(RegistryError::NonMonotonicCompletion(id.clone()));
                }
            }

            let mut tenant = Tenant::clone(entry);
            let today = tenant.day_key_at(outcome.acted_at.wall);
            let mut daily = tenant.daily.rolled_to(today);
            daily.llm_calls += outcome.llm_calls;
            daily.posts += outcome.posts;
            daily.llm_tokens += outcome.llm_tokens;
            tenant.daily = daily;
            tenant.last_acted_at = Some(outcome.acted_at);
            tenant.updated_at = outcome.acted_at.wall;
            *entry = Arc::new(tenant);
        }
        self.dirty.lock().insert(id.clone());
        Ok(())
    }

    /// Writes every dirty snapshot back to the repository. Tenants that
    /// fail to write stay dirty for the next flush.
    pub async fn flush(&self) -> Result<(), RepositoryError> {
        let pending: Vec<TenantId> = self.dirty.lock().drain().collect();
        if pending.is_empty() {
            return Ok(());
        }
        debug!(count = pending.len(), "flushing tenant write-backs");

        let mut last_err = None;
        for id in pending {
            let Some(snapshot) = self.snapshot(&id) else {
                continue;
            };
            if let Err(err) = self.repo.upsert_tenant(Tenant::clone(&snapshot)).await {
                warn!(tenant = %id, error = %err, "tenant write-back failed");
                self.dirty.lock().insert(id);
                last_err = Some(err);
            }
        }
        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-reads the tenant list from the repository and merges it over
    /// the in-memory snapshots. Dirty state is flushed first so local
    /// progress is not lost. Configuration fields always come from the
    /// repository; `last_acted_at` and the daily counters keep whichever
    /// side has acted more recently.
    pub async fn reconcile(&self) -> Result<(), RepositoryError> {
        self.flush().await?;
        let tenants = self.repo.list_tenants().await?;

        let mut snapshots = self.snapshots.write();
        let mut merged: HashMap<TenantId, Arc<Tenant>> = HashMap::with_capacity(tenants.len());
        for mut incoming in tenants {
            if let Some(current) = snapshots.get(&incoming.id) {
                let local_ahead = match (current.last_acted_at, incoming.last_acted_at) {
                    (Some(local), Some(remote)) => local.mono > remote.mono,
                    (Some(_), None) => true,
                    _ => false,
                };
                if local_ahead {
                    incoming.last_acted_at = current.last_acted_at;
                    incoming.daily = current.daily;
                }
            }
            merged.insert(incoming.id.clone(), Arc::new(incoming));
        }
        *snapshots = merged;
        Ok(())
    }
}
