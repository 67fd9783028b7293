//! In-flight claims.

use std::sync::Arc;

use hashbrown::HashSet;
use parking_lot::Mutex;
use quillcast_core::TenantId;

/// Tracks which tenants currently have a work item in flight.
///
/// A claimed tenant cannot be selected again until its
/// [`TenantClaim`] drops, which gives the engine its at-most-one-job-
/// per-tenant guarantee across defer, failure, and panic paths alike.
#[derive(Clone, Default)]
pub struct ClaimSet {
    inner: Arc<Mutex<HashSet<TenantId>>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id` if it is free.
    pub fn try_claim(&self, id: &TenantId) -> Option<TenantClaim> {
        let mut claimed = self.inner.lock();
        if claimed.insert(id.clone()) {
            Some(TenantClaim {
                set: Arc::clone(&self.inner),
                id: id.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, id: &TenantId) -> bool {
        self.inner.lock().contains(id)
    }

    /// Number of outstanding claims.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one tenant. Released on drop.
pub struct TenantClaim {
    set: Arc<Mutex<HashSet<TenantId>>>,
    id: TenantId,
}

impl TenantClaim {
    pub fn tenant_id(&self) -> &TenantId {
        &self.id
    }
}

impl Drop for TenantClaim {
    fn drop(&mut self) {
        self.set.lock().remove(&self.id);
    }
}
