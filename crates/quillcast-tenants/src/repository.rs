//! The durable repository interface and the in-memory implementation.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use quillcast_core::{PostId, TenantId};

use crate::error::RepositoryError;
use crate::post::{Post, PostStatus, PostTransition};
use crate::tenant::Tenant;

/// Durable storage for tenants and posts.
///
/// `update_post_status` is a conditional update: it must reject a
/// transition the record's current status does not allow, atomically
/// with the read.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, RepositoryError>;

    async fn get_tenant(&self, id: &TenantId) -> Result<Tenant, RepositoryError>;

    async fn upsert_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError>;

    async fn insert_post(&self, post: Post) -> Result<(), RepositoryError>;

    async fn get_post(&self, id: &PostId) -> Result<Post, RepositoryError>;

    /// Applies `transition` iff the record's current status allows it,
    /// returning the updated record.
    async fn update_post_status(
        &self,
        id: &PostId,
        transition: PostTransition,
    ) -> Result<Post, RepositoryError>;

    /// Texts of the tenant's most recent published posts, newest first.
    async fn recent_published_texts(
        &self,
        tenant: &TenantId,
        n: usize,
    ) -> Result<Vec<String>, RepositoryError>;
}

#[derive(Default)]
struct MemoryState {
    tenants: HashMap<TenantId, Tenant>,
    posts: HashMap<PostId, Post>,
    /// Insertion order, for recency queries.
    post_order: Vec<PostId>,
}

/// In-memory repository for tests and single-process deployments.
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Pre-loads a tenant. Test convenience.
    pub fn with_tenant(self, tenant: Tenant) -> Self {
        self.state.lock().tenants.insert(tenant.id.clone(), tenant);
        self
    }

    /// Simulates an unreachable repository. Test hook.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Removes a tenant outright, as operator tooling would.
    pub fn remove_tenant(&self, id: &TenantId) {
        self.state.lock().tenants.remove(id);
    }

    /// All post records, insertion-ordered. Test inspection.
    pub fn posts(&self) -> Vec<Post> {
        let state = self.state.lock();
        state
            .post_order
            .iter()
            .filter_map(|id| state.posts.get(id).cloned())
            .collect()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("repository marked unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn list_tenants(&self) -> Result<Vec<Tenant>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock();
        let mut tenants: Vec<Tenant> = state.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tenants)
    }

    async fn get_tenant(&self, id: &TenantId) -> Result<Tenant, RepositoryError> {
        self.check_available()?;
        self.state
            .lock()
            .tenants
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::TenantNotFound(id.clone()))
    }

    async fn upsert_tenant(&self, tenant: Tenant) -> Result<(), RepositoryError> {
        self.check_available()?;
        self.state.lock().tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    async fn insert_post(&self, post: Post) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.post_order.push(post.id.clone());
        state.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn get_post(&self, id: &PostId) -> Result<Post, RepositoryError> {
        self.check_available()?;
        self.state
            .lock()
            .posts
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::PostNotFound(id.clone()))
    }

    async fn update_post_status(
        &self,
        id: &PostId,
        transition: PostTransition,
    ) -> Result<Post, RepositoryError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let post = state
            .posts
            .get_mut(id)
            .ok_or_else(|| RepositoryError::PostNotFound(id.clone()))?;

        if !post.status.allows(&transition) {
            return Err(RepositoryError::IllegalTransition {
                from: post.status,
                to: transition.target_status(),
            });
        }
        post.apply(transition);
        Ok(post.clone())
    }

    async fn recent_published_texts(
        &self,
        tenant: &TenantId,
        n: usize,
    ) -> Result<Vec<String>, RepositoryError> {
        self.check_available()?;
        let state = self.state.lock();
        let texts: Vec<String> = state
            .post_order
            .iter()
            .rev()
            .filter_map(|id| state.posts.get(id))
            .filter(|p| p.tenant_id == *tenant && p.status == PostStatus::Published)
            .map(|p| p.text.clone())
            .take(n)
            .collect();
        Ok(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::{FailureKind, PostFailure};
    use chrono::{TimeZone, Utc};

    fn pending(id: &str, tenant: &str) -> Post {
        Post::pending(
            PostId::new(id),
            TenantId::new(tenant),
            Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap(),
        )
    }

    fn publish(external: &str) -> PostTransition {
        PostTransition::Publish {
            text: format!("text for {external}"),
            external_id: external.into(),
            published_at: Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap(),
            warnings: vec![],
        }
    }

    #[tokio::test]
    async fn conditional_update_rejects_double_publish() {
        let repo = MemoryRepository::new();
        repo.insert_post(pending("p1", "t1")).await.unwrap();

        let updated = repo
            .update_post_status(&PostId::new("p1"), publish("ext-1"))
            .await
            .unwrap();
        assert_eq!(updated.status, PostStatus::Published);

        let err = repo
            .update_post_status(&PostId::new("p1"), publish("ext-2"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::IllegalTransition {
                from: PostStatus::Published,
                to: PostStatus::Published,
            }
        ));

        // The original external id is untouched.
        let post = repo.get_post(&PostId::new("p1")).await.unwrap();
        assert_eq!(post.external_id.as_deref(), Some("ext-1"));
    }

    #[tokio::test]
    async fn failed_posts_cannot_be_published() {
        let repo = MemoryRepository::new();
        repo.insert_post(pending("p1", "t1")).await.unwrap();
        repo.update_post_status(
            &PostId::new("p1"),
            PostTransition::Fail {
                failure: PostFailure {
                    kind: FailureKind::Validation,
                    message: "empty".into(),
                },
                text: None,
            },
        )
        .await
        .unwrap();

        let err = repo
            .update_post_status(&PostId::new("p1"), publish("ext"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn recent_texts_are_newest_first_and_published_only() {
        let repo = MemoryRepository::new();
        for id in ["p1", "p2", "p3"] {
            repo.insert_post(pending(id, "t1")).await.unwrap();
        }
        repo.update_post_status(&PostId::new("p1"), publish("e1")).await.unwrap();
        repo.update_post_status(&PostId::new("p3"), publish("e3")).await.unwrap();
        // p2 stays pending and must not appear.

        let texts = repo
            .recent_published_texts(&TenantId::new("t1"), 10)
            .await
            .unwrap();
        assert_eq!(
            texts,
            vec!["text for e3".to_string(), "text for e1".to_string()]
        );

        let texts = repo
            .recent_published_texts(&TenantId::new("t1"), 1)
            .await
            .unwrap();
        assert_eq!(texts, vec!["text for e3".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_repo_errors_every_call() {
        let repo = MemoryRepository::new();
        repo.set_unavailable(true);
        assert!(matches!(
            repo.list_tenants().await.unwrap_err(),
            RepositoryError::Unavailable(_)
        ));
    }
}
