//! Work-item execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use metrics::counter;
use quillcast_cache::{singleflight, Flight, SemanticCache, SingleFlight};
use quillcast_core::{calendar, SharedClock, TenantId};
use quillcast_drivers::{
    Completion, DriverError, EmbeddingDriver, GenerationParams, KnowledgeDriver, LlmDriver,
    PostingDriver,
};
use quillcast_prompt::{RenderedPrompt, Renderer};
use quillcast_ratelimit::{Decision, RateLimitCoordinator};
use quillcast_scheduler::WorkItem;
use quillcast_tenants::{
    ActedAt, CompletionOutcome, FailureKind, Post, PostFailure, PostStatus, PostTransition,
    Repository, Tenant, TenantRegistry,
};
use quillcast_validate::{Candidate, ValidationFailure, ValidatorChain};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::events::PipelineEvent;
use crate::retry::{ExponentialBackoff, IntervalFunction};

/// Terminal outcome of one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Published {
        post_id: quillcast_core::PostId,
        external_id: String,
    },
    /// The item made no terminal progress; the scheduler may reselect
    /// the tenant after `retry_after`.
    Deferred { retry_after: Duration },
    Failed {
        post_id: quillcast_core::PostId,
        kind: FailureKind,
    },
    /// Shutdown interrupted the item; its record keeps the last state
    /// it reached.
    Aborted,
}

/// External collaborators, engine-owned and injected at construction.
pub struct PipelineDeps {
    pub clock: SharedClock,
    pub coordinator: Arc<RateLimitCoordinator>,
    pub registry: Arc<TenantRegistry>,
    pub repository: Arc<dyn Repository>,
    pub renderer: Arc<Renderer>,
    pub cache: Arc<SemanticCache>,
    pub validator: Arc<ValidatorChain>,
    pub llm: Arc<dyn LlmDriver>,
    pub embedder: Arc<dyn EmbeddingDriver>,
    pub posting: Arc<dyn PostingDriver>,
    pub knowledge: Option<Arc<dyn KnowledgeDriver>>,
    /// How many recent published posts feed the duplication rule.
    pub history_len: usize,
}

struct Generated {
    text: String,
    token_usage: u32,
    llm_calls: u32,
    cache_hit: bool,
}

#[derive(Debug, Error)]
enum ObtainError {
    #[error("rate limited, retry after {0:?}")]
    RateLimited(Duration),
    /// The leader's own attempts were exhausted. Terminal.
    #[error("generation failed: {0}")]
    Exhausted(String),
    #[error("generation rejected: {0}")]
    Terminal(String),
    /// A coalesced leader failed or was cancelled; this waiter never
    /// made its own attempt. Deferred, not failed.
    #[error("coalesced generation unavailable: {0}")]
    Shared(String),
    #[error("aborted by shutdown")]
    Aborted,
}

#[derive(Debug, Error)]
enum PublishError {
    #[error("publish failed: {0}")]
    Terminal(String),
    #[error("publish attempts exhausted: {0}")]
    Exhausted(String),
    #[error("duplicate content")]
    Duplicate,
    #[error("aborted by shutdown")]
    Aborted,
}

/// Runs work items end to end. One instance is shared by every worker.
pub struct GenerationPipeline {
    deps: PipelineDeps,
    config: PipelineConfig,
    flight: SingleFlight<String>,
    post_seq: AtomicU64,
}

impl GenerationPipeline {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self {
            deps,
            config,
            flight: SingleFlight::new(),
            post_seq: AtomicU64::new(1),
        }
    }

    /// Executes one work item. The item's claim is held until this
    /// returns, so the tenant cannot be reselected mid-run.
    pub async fn run(&self, item: WorkItem, mut shutdown: watch::Receiver<bool>) -> JobOutcome {
        let tenant = Arc::clone(&item.tenant);
        let outcome = self.run_inner(&tenant, &mut shutdown).await;

        let label = match &outcome {
            JobOutcome::Published { .. } => "published",
            JobOutcome::Deferred { .. } => "deferred",
            JobOutcome::Failed { .. } => "failed",
            JobOutcome::Aborted => "aborted",
        };
        counter!("quillcast_jobs_total", "outcome" => label).increment(1);
        self.emit(&tenant.id, &outcome);

        drop(item);
        outcome
    }

    fn emit(&self, tenant: &TenantId, outcome: &JobOutcome) {
        let event = match outcome {
            JobOutcome::Published { .. } => PipelineEvent::Published {
                tenant: tenant.clone(),
                timestamp: Instant::now(),
            },
            JobOutcome::Deferred { retry_after } => PipelineEvent::Deferred {
                tenant: tenant.clone(),
                retry_after: *retry_after,
                timestamp: Instant::now(),
            },
            JobOutcome::Failed { kind, .. } => PipelineEvent::Failed {
                tenant: tenant.clone(),
                kind: *kind,
                timestamp: Instant::now(),
            },
            JobOutcome::Aborted => PipelineEvent::Aborted {
                tenant: tenant.clone(),
                timestamp: Instant::now(),
            },
        };
        self.config.event_listeners.emit(&event);
    }

    async fn run_inner(
        &self,
        tenant: &Arc<Tenant>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> JobOutcome {
        // Step 1: create the record in `pending`.
        let post_id = self.next_post_id(&tenant.id);
        let created_at = self.deps.clock.now_wall();
        let record = Post::pending(post_id.clone(), tenant.id.clone(), created_at);
        if let Err(err) = self.deps.repository.insert_post(record).await {
            warn!(tenant = %tenant.id, error = %err, "could not create post record");
            return JobOutcome::Deferred {
                retry_after: self.config.transient_defer,
            };
        }

        // Step 2: LLM admission. A deferral releases the claim with the
        // record untouched.
        let now_secs = calendar::epoch_secs(self.deps.clock.now_wall());
        if let Decision::Defer(wait) = self.deps.coordinator.admit_llm(&tenant.id, now_secs).await
        {
            debug!(tenant = %tenant.id, ?wait, "llm admission deferred");
            return JobOutcome::Deferred { retry_after: wait };
        }

        // Step 3: optional knowledge context; failure is non-fatal.
        let context = self.fetch_context(tenant).await;

        // Step 4: render the prompt.
        let mut vars = HashMap::new();
        vars.insert("display_name".to_string(), tenant.display_name.clone());
        vars.insert("context".to_string(), context.join("\n"));
        let rendered = match self
            .deps
            .renderer
            .render(&self.config.template_name, &vars, &tenant.persona_prompt)
        {
            Ok(rendered) => rendered,
            Err(err) => {
                error!(tenant = %tenant.id, error = %err, "template render failed");
                return self
                    .fail_post(&post_id, FailureKind::Config, err.to_string(), None)
                    .await;
            }
        };

        // Steps 5–6: cache, single-flight, LLM.
        let generated = match self.obtain_completion(&rendered, shutdown).await {
            Ok(generated) => generated,
            Err(ObtainError::RateLimited(retry_after)) => {
                let now_secs = calendar::epoch_secs(self.deps.clock.now_wall());
                self.deps
                    .coordinator
                    .penalize_llm_pacing(&tenant.id, retry_after, now_secs)
                    .await;
                return JobOutcome::Deferred { retry_after };
            }
            Err(ObtainError::Shared(reason)) => {
                debug!(tenant = %tenant.id, %reason, "coalesced leader failed, deferring");
                return JobOutcome::Deferred {
                    retry_after: self.config.transient_defer,
                };
            }
            Err(err @ (ObtainError::Exhausted(_) | ObtainError::Terminal(_))) => {
                return self
                    .fail_post(&post_id, FailureKind::Generation, err.to_string(), None)
                    .await;
            }
            Err(ObtainError::Aborted) => return JobOutcome::Aborted,
        };

        let text = quillcast_prompt::normalize(&generated.text);

        // Step 7: validation.
        let recent = match self
            .deps
            .repository
            .recent_published_texts(&tenant.id, self.deps.history_len)
            .await
        {
            Ok(recent) => recent,
            Err(err) => {
                warn!(tenant = %tenant.id, error = %err, "could not load recent posts");
                return JobOutcome::Deferred {
                    retry_after: self.config.transient_defer,
                };
            }
        };
        let candidate = Candidate {
            text: &text,
            recent_posts: &recent,
        };
        let warnings = match self.deps.validator.run(&candidate).await {
            Ok(verdict) => verdict.warnings,
            Err(err @ ValidationFailure::Rejected { .. }) => {
                return self
                    .fail_post(
                        &post_id,
                        FailureKind::Validation,
                        err.to_string(),
                        Some(text),
                    )
                    .await;
            }
            Err(ValidationFailure::ClassifierUnavailable(reason)) => {
                warn!(tenant = %tenant.id, %reason, "safety classifier unavailable");
                return JobOutcome::Deferred {
                    retry_after: self.config.transient_defer,
                };
            }
        };

        // Step 8: publish admission, parked up to the configured bound.
        let mut parked = Duration::ZERO;
        loop {
            let now_secs = calendar::epoch_secs(self.deps.clock.now_wall());
            match self.deps.coordinator.admit_post(&tenant.id, now_secs).await {
                Decision::Admit => break,
                Decision::Defer(wait) => {
                    if parked + wait > self.config.post_park_max {
                        return self
                            .fail_post(
                                &post_id,
                                FailureKind::QuotaExceeded,
                                "post quota still exhausted after parking".to_string(),
                                Some(text),
                            )
                            .await;
                    }
                    parked += wait;
                    debug!(tenant = %tenant.id, ?wait, total_parked = ?parked, "parking validated post");
                    if self.interruptible_sleep(wait, shutdown).await.is_err() {
                        return JobOutcome::Aborted;
                    }
                }
            }
        }

        // Step 9: publish.
        let external_id = match self
            .publish_with_retry(tenant, &post_id, &text, shutdown)
            .await
        {
            Ok(external_id) => external_id,
            Err(PublishError::Duplicate) => {
                return self
                    .fail_post(
                        &post_id,
                        FailureKind::Publish,
                        "posting backend rejected duplicate content".to_string(),
                        Some(text),
                    )
                    .await;
            }
            Err(err @ (PublishError::Terminal(_) | PublishError::Exhausted(_))) => {
                return self
                    .fail_post(&post_id, FailureKind::Publish, err.to_string(), Some(text))
                    .await;
            }
            Err(PublishError::Aborted) => return JobOutcome::Aborted,
        };

        // Step 10: single conditional write of `published` + external id,
        // then the registry bump.
        let published_at = self.deps.clock.now_wall();
        let transition = PostTransition::Publish {
            text: text.clone(),
            external_id: external_id.clone(),
            published_at,
            warnings,
        };
        if let Err(err) = self
            .deps
            .repository
            .update_post_status(&post_id, transition)
            .await
        {
            // The publish itself happened; a lost record write must not
            // turn it into a retry.
            warn!(post = %post_id, error = %err, "post record update failed after publish");
        }

        let completion = CompletionOutcome {
            acted_at: ActedAt {
                mono: self.deps.clock.now_mono(),
                wall: published_at,
            },
            llm_calls: generated.llm_calls,
            posts: 1,
            llm_tokens: generated.token_usage as u64,
        };
        if let Err(err) = self.deps.registry.record_completion(&tenant.id, completion) {
            warn!(tenant = %tenant.id, error = %err, "completion bookkeeping failed");
        }
        if generated.token_usage > 0 {
            counter!("quillcast_llm_tokens_total").increment(generated.token_usage as u64);
        }

        info!(
            tenant = %tenant.id,
            post = %post_id,
            external = %external_id,
            cache_hit = generated.cache_hit,
            "post published"
        );
        JobOutcome::Published {
            post_id,
            external_id,
        }
    }

    fn next_post_id(&self, tenant: &TenantId) -> quillcast_core::PostId {
        let seq = self.post_seq.fetch_add(1, Ordering::SeqCst);
        let millis = self.deps.clock.now_wall().timestamp_millis();
        quillcast_core::PostId::new(format!("{tenant}-{millis}-{seq}"))
    }

    async fn fail_post(
        &self,
        post_id: &quillcast_core::PostId,
        kind: FailureKind,
        message: String,
        text: Option<String>,
    ) -> JobOutcome {
        let transition = PostTransition::Fail {
            failure: PostFailure {
                kind,
                message: message.clone(),
            },
            text,
        };
        if let Err(err) = self
            .deps
            .repository
            .update_post_status(post_id, transition)
            .await
        {
            warn!(post = %post_id, error = %err, "could not record post failure");
        }
        debug!(post = %post_id, %kind, %message, "post failed");
        JobOutcome::Failed {
            post_id: post_id.clone(),
            kind,
        }
    }

    async fn fetch_context(&self, tenant: &Tenant) -> Vec<String> {
        let (Some(driver), Some(handle)) = (&self.deps.knowledge, &tenant.knowledge_handle)
        else {
            return Vec::new();
        };
        match timeout(self.config.knowledge_timeout, driver.fetch_context(handle)).await {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(err)) => {
                warn!(tenant = %tenant.id, error = %err, "knowledge unavailable, proceeding without context");
                Vec::new()
            }
            Err(_) => {
                warn!(tenant = %tenant.id, "knowledge fetch timed out, proceeding without context");
                Vec::new()
            }
        }
    }

    async fn obtain_completion(
        &self,
        rendered: &RenderedPrompt,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Generated, ObtainError> {
        if let Some(text) = self.deps.cache.lookup_exact(&rendered.hash) {
            return Ok(Generated {
                text,
                token_usage: 0,
                llm_calls: 0,
                cache_hit: true,
            });
        }

        match self.flight.join(&rendered.hash) {
            Flight::Wait(rx) => {
                let result = tokio::select! {
                    result = singleflight::wait(rx) => result,
                    _ = wait_shutdown(shutdown) => return Err(ObtainError::Aborted),
                };
                match result {
                    Ok(text) => Ok(Generated {
                        text,
                        token_usage: 0,
                        llm_calls: 0,
                        cache_hit: true,
                    }),
                    Err(err) => Err(ObtainError::Shared(err.to_string())),
                }
            }
            Flight::Lead(guard) => {
                // Embed before taking any cache lock; an embedding
                // failure only disables the semantic level.
                let embedding = match timeout(
                    self.config.embed_timeout,
                    self.deps.embedder.embed(&rendered.text),
                )
                .await
                {
                    Ok(Ok(vector)) => vector,
                    Ok(Err(err)) => {
                        warn!(error = %err, "embedding failed, skipping semantic lookup");
                        Vec::new()
                    }
                    Err(_) => {
                        warn!("embedding timed out, skipping semantic lookup");
                        Vec::new()
                    }
                };

                if !embedding.is_empty() {
                    if let Some(hit) = self.deps.cache.lookup_semantic(&embedding) {
                        guard.complete(hit.completion.clone());
                        return Ok(Generated {
                            text: hit.completion,
                            token_usage: 0,
                            llm_calls: 0,
                            cache_hit: true,
                        });
                    }
                }

                match self.call_llm(&rendered.text, shutdown).await {
                    Ok(completion) => {
                        self.deps.cache.insert(
                            rendered.hash.clone(),
                            embedding,
                            completion.text.clone(),
                        );
                        guard.complete(completion.text.clone());
                        Ok(Generated {
                            token_usage: completion.token_usage,
                            text: completion.text,
                            llm_calls: 1,
                            cache_hit: false,
                        })
                    }
                    Err(err) => {
                        match &err {
                            // Dropping the guard wakes waiters with a
                            // cancellation they treat as transient.
                            ObtainError::Aborted => drop(guard),
                            other => guard.fail(other.to_string()),
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    async fn call_llm(
        &self,
        prompt: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Completion, ObtainError> {
        let backoff = ExponentialBackoff::new(self.config.backoff_initial, self.config.backoff_cap);
        let params = GenerationParams::default();
        let mut last_error = String::from("no attempts made");

        for attempt in 0..self.config.llm_attempts {
            if attempt > 0 {
                let delay = backoff.next_interval(attempt - 1);
                debug!(attempt, ?delay, "retrying llm call");
                if self.interruptible_sleep(delay, shutdown).await.is_err() {
                    return Err(ObtainError::Aborted);
                }
            }

            let result = tokio::select! {
                result = timeout(self.config.llm_timeout, self.deps.llm.complete(prompt, &params)) => result,
                _ = wait_shutdown(shutdown) => return Err(ObtainError::Aborted),
            };
            match result {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(DriverError::RateLimited { retry_after })) => {
                    return Err(ObtainError::RateLimited(retry_after));
                }
                Ok(Err(err)) if err.is_retryable() => {
                    warn!(attempt, error = %err, "llm call failed");
                    last_error = err.to_string();
                }
                Ok(Err(err)) => return Err(ObtainError::Terminal(err.to_string())),
                Err(_) => {
                    warn!(attempt, "llm call timed out");
                    last_error = format!("timed out after {:?}", self.config.llm_timeout);
                }
            }
        }
        Err(ObtainError::Exhausted(last_error))
    }

    async fn publish_with_retry(
        &self,
        tenant: &Tenant,
        post_id: &quillcast_core::PostId,
        text: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<String, PublishError> {
        let backoff = ExponentialBackoff::new(self.config.backoff_initial, self.config.backoff_cap);
        let mut last_error = String::from("no attempts made");

        for attempt in 0..self.config.publish_attempts {
            if attempt > 0 {
                let delay = backoff.next_interval(attempt - 1);
                debug!(attempt, ?delay, "retrying publish");
                if self.interruptible_sleep(delay, shutdown).await.is_err() {
                    return Err(PublishError::Aborted);
                }
            }

            // A prior attempt may have landed even though we saw an
            // error; never publish a record that is already published.
            if attempt > 0 {
                if let Ok(record) = self.deps.repository.get_post(post_id).await {
                    if record.status == PostStatus::Published {
                        if let Some(external_id) = record.external_id {
                            return Ok(external_id);
                        }
                    }
                }
            }

            let result = tokio::select! {
                result = timeout(
                    self.config.post_timeout,
                    self.deps.posting.publish(&tenant.credentials, text),
                ) => result,
                _ = wait_shutdown(shutdown) => return Err(PublishError::Aborted),
            };
            match result {
                Ok(Ok(published)) => return Ok(published.external_id),
                Ok(Err(DriverError::DuplicateContent)) => return Err(PublishError::Duplicate),
                Ok(Err(DriverError::RateLimited { retry_after })) => {
                    warn!(attempt, ?retry_after, "posting backend rate limited");
                    last_error = "posting backend rate limited".to_string();
                    if self.interruptible_sleep(retry_after, shutdown).await.is_err() {
                        return Err(PublishError::Aborted);
                    }
                }
                Ok(Err(err)) if err.is_retryable() => {
                    warn!(attempt, error = %err, "publish failed");
                    last_error = err.to_string();
                }
                Ok(Err(err)) => return Err(PublishError::Terminal(err.to_string())),
                Err(_) => {
                    warn!(attempt, "publish timed out");
                    last_error = format!("timed out after {:?}", self.config.post_timeout);
                }
            }
        }
        Err(PublishError::Exhausted(last_error))
    }

    /// Sleeps unless shutdown fires first.
    async fn interruptible_sleep(
        &self,
        duration: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        tokio::select! {
            _ = sleep(duration) => Ok(()),
            _ = wait_shutdown(shutdown) => Err(()),
        }
    }
}

/// Resolves when shutdown is signalled or the engine's sender is gone.
async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use chrono_tz::UTC;
    use quillcast_cache::CacheConfig;
    use quillcast_core::{Clock, Credentials, ManualClock};
    use quillcast_drivers::fake::{FakeEmbedder, FakeKnowledge, FakeLlm, FakePosting, FakeSafety};
    use quillcast_prompt::{PromptTemplate, TemplateStore};
    use quillcast_ratelimit::{CounterStore, MemoryCounterStore, QuotaConfig};
    use quillcast_scheduler::ClaimSet;
    use quillcast_tenants::{MemoryRepository, PostingWindows};
    use quillcast_validate::ValidatorConfig;

    struct Harness {
        pipeline: Arc<GenerationPipeline>,
        clock: Arc<ManualClock>,
        repo: Arc<MemoryRepository>,
        registry: Arc<TenantRegistry>,
        llm: Arc<FakeLlm>,
        posting: Arc<FakePosting>,
        knowledge: Arc<FakeKnowledge>,
        claims: ClaimSet,
        shutdown_tx: watch::Sender<bool>,
        shutdown_rx: watch::Receiver<bool>,
    }

    fn tenant(id: &str, now: chrono::DateTime<Utc>) -> Tenant {
        let mut t = Tenant::new(
            quillcast_core::TenantId::new(id),
            "Poster",
            UTC,
            PostingWindows::from_hours(0..24),
            Credentials::new("secret"),
            now,
        );
        t.persona_prompt = "You are concise.".to_string();
        t
    }

    async fn harness_with(
        tenants: Vec<Tenant>,
        quotas: QuotaConfig,
        config: PipelineConfig,
        template_body: &str,
    ) -> Harness {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::starting_at(start));

        let repo = Arc::new(MemoryRepository::new());
        for t in tenants {
            repo.upsert_tenant(t).await.unwrap();
        }
        let registry = Arc::new(
            TenantRegistry::load(repo.clone() as Arc<dyn Repository>)
                .await
                .unwrap(),
        );

        let store = Arc::new(MemoryCounterStore::new());
        let coordinator = Arc::new(RateLimitCoordinator::new(
            store as Arc<dyn CounterStore>,
            quotas,
        ));

        let mut templates = TemplateStore::new();
        templates.insert(PromptTemplate::new("post", 1, template_body, 1000));

        let llm = Arc::new(FakeLlm::new());
        let posting = Arc::new(FakePosting::new());
        let knowledge = Arc::new(FakeKnowledge::new());

        let deps = PipelineDeps {
            clock: clock.clone(),
            coordinator,
            registry: registry.clone(),
            repository: repo.clone(),
            renderer: Arc::new(Renderer::new(templates)),
            cache: Arc::new(SemanticCache::new(CacheConfig::default())),
            validator: Arc::new(
                ValidatorConfig::default().into_chain(Arc::new(FakeSafety::permissive())),
            ),
            llm: llm.clone(),
            embedder: Arc::new(FakeEmbedder::new()),
            posting: posting.clone(),
            knowledge: Some(knowledge.clone()),
            history_len: 10,
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Harness {
            pipeline: Arc::new(GenerationPipeline::new(deps, config)),
            clock,
            repo,
            registry,
            llm,
            posting,
            knowledge,
            claims: ClaimSet::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    async fn harness(quotas: QuotaConfig) -> Harness {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        harness_with(
            vec![tenant("a", start)],
            quotas,
            PipelineConfig::builder()
                .backoff_initial(Duration::from_millis(1))
                .build()
                .unwrap(),
            "{{persona}}\n{{display_name}}: share one update.\n{{context}}",
        )
        .await
    }

    impl Harness {
        async fn run_for(&self, id: &str) -> JobOutcome {
            let tenant_id = quillcast_core::TenantId::new(id);
            let tenant = self.registry.snapshot(&tenant_id).expect("tenant exists");
            let claim = self.claims.try_claim(&tenant_id).expect("tenant unclaimed");
            self.pipeline
                .run(WorkItem { tenant, claim }, self.shutdown_rx.clone())
                .await
        }
    }

    #[tokio::test]
    async fn happy_path_publishes_one_post() {
        let h = harness(QuotaConfig::default()).await;

        let outcome = h.run_for("a").await;
        let JobOutcome::Published { external_id, .. } = outcome else {
            panic!("expected publish, got {outcome:?}");
        };
        assert_eq!(external_id, "ext-1");
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.posting.published().len(), 1);

        let posts = h.repo.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].status, PostStatus::Published);
        assert_eq!(posts[0].external_id.as_deref(), Some("ext-1"));

        let snapshot = h.registry.snapshot(&quillcast_core::TenantId::new("a")).unwrap();
        assert!(snapshot.last_acted_at.is_some());
        assert_eq!(snapshot.daily.posts, 1);
        assert_eq!(snapshot.daily.llm_calls, 1);
        // The claim is free again.
        assert!(h.claims.is_empty());
    }

    #[tokio::test]
    async fn pacing_defers_a_back_to_back_run() {
        let h = harness(QuotaConfig::default()).await;

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        h.clock.advance(Duration::from_millis(500));

        match h.run_for("a").await {
            JobOutcome::Deferred { retry_after } => {
                assert!(retry_after >= Duration::from_millis(400), "{retry_after:?}");
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        // The deferred record stays pending, untouched.
        let posts = h.repo.posts();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].status, PostStatus::Pending);
    }

    #[tokio::test]
    async fn driver_rate_limit_defers_with_the_hint() {
        let h = harness(QuotaConfig::default()).await;
        h.llm.push(Err(DriverError::RateLimited {
            retry_after: Duration::from_secs(2),
        }));

        match h.run_for("a").await {
            JobOutcome::Deferred { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(2));
            }
            other => panic!("expected deferral, got {other:?}"),
        }
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.repo.posts()[0].status, PostStatus::Pending);
        assert!(h.posting.published().is_empty());

        // The pacing bucket carries the hint: a retry before the window
        // closes is deferred again without calling the driver.
        h.clock.advance(Duration::from_secs(1));
        assert!(matches!(h.run_for("a").await, JobOutcome::Deferred { .. }));
        assert_eq!(h.llm.calls(), 1);

        h.clock.advance(Duration::from_secs(2));
        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn duplicate_text_fails_validation() {
        let h = harness(QuotaConfig::default()).await;
        h.llm.push_text("an identical update");
        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));

        h.clock.advance(Duration::from_secs(2));
        // Identical prompt: the second run is served the same text from
        // the cache and trips the duplication rule.
        match h.run_for("a").await {
            JobOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Validation),
            other => panic!("expected validation failure, got {other:?}"),
        }
        let posts = h.repo.posts();
        assert_eq!(posts[1].status, PostStatus::Failed);
        assert_eq!(
            posts[1].failure.as_ref().map(|f| f.kind),
            Some(FailureKind::Validation)
        );
        // Only the first run published.
        assert_eq!(h.posting.published().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_post_quota_parks_then_fails() {
        let quotas = QuotaConfig::builder().client_daily_posts(1).build().unwrap();
        let h = harness(quotas).await;

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        h.clock.advance(Duration::from_secs(2));

        // A changed persona renders a fresh prompt, so the second run
        // generates new text and reaches publish admission.
        let mut updated = tenant("a", h.clock.now_wall());
        updated.persona_prompt = "You are expansive.".to_string();
        h.repo.upsert_tenant(updated).await.unwrap();
        h.registry.reconcile().await.unwrap();

        match h.run_for("a").await {
            JobOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::QuotaExceeded),
            other => panic!("expected quota failure, got {other:?}"),
        }
        let posts = h.repo.posts();
        assert_eq!(
            posts[1].failure.as_ref().map(|f| f.kind),
            Some(FailureKind::QuotaExceeded)
        );
        // The validated text is preserved on the failed record.
        assert!(!posts[1].text.is_empty());
    }

    #[tokio::test]
    async fn missing_template_variable_is_a_config_failure() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let h = harness_with(
            vec![tenant("a", start)],
            QuotaConfig::default(),
            PipelineConfig::default(),
            "{{persona}} {{topic}}",
        )
        .await;

        match h.run_for("a").await {
            JobOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Config),
            other => panic!("expected config failure, got {other:?}"),
        }
        assert_eq!(h.llm.calls(), 0);
    }

    #[tokio::test]
    async fn knowledge_outage_is_non_fatal() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let mut t = tenant("a", start);
        t.knowledge_handle = Some("kb-a".to_string());
        let h = harness_with(
            vec![t],
            QuotaConfig::default(),
            PipelineConfig::default(),
            "{{persona}} {{context}} update",
        )
        .await;
        h.knowledge.set_unavailable(true);

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
    }

    #[tokio::test]
    async fn knowledge_context_reaches_the_prompt() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let mut t = tenant("a", start);
        t.knowledge_handle = Some("kb-a".to_string());
        let h = harness_with(
            vec![t],
            QuotaConfig::default(),
            PipelineConfig::default(),
            "{{context}}",
        )
        .await;
        h.knowledge.insert("kb-a", vec!["release day".to_string()]);

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        // The fake llm echoes its prompt, which carried the context.
        assert!(h.posting.published()[0].1.contains("release day"));
    }

    #[tokio::test]
    async fn identical_prompts_share_one_llm_call_across_tenants() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let h = harness_with(
            vec![tenant("a", start), tenant("b", start)],
            QuotaConfig::default(),
            PipelineConfig::default(),
            "{{persona}} {{display_name}}: share one update.",
        )
        .await;

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        assert!(matches!(h.run_for("b").await, JobOutcome::Published { .. }));
        // Same persona and display name render the same prompt; the
        // second tenant is served from the cache.
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.posting.published().len(), 2);
        assert_eq!(h.posting.published()[0].1, h.posting.published()[1].1);
    }

    #[tokio::test]
    async fn publish_retries_transient_errors_then_succeeds() {
        let h = harness(QuotaConfig::default()).await;
        h.posting
            .fail_next(DriverError::Retryable("flaky network".into()));

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        assert_eq!(h.posting.calls(), 2);
        assert_eq!(h.posting.published().len(), 1);
    }

    #[tokio::test]
    async fn non_retryable_llm_error_fails_generation() {
        let h = harness(QuotaConfig::default()).await;
        h.llm
            .push(Err(DriverError::NonRetryable("model gone".into())));

        match h.run_for("a").await {
            JobOutcome::Failed { kind, .. } => assert_eq!(kind, FailureKind::Generation),
            other => panic!("expected generation failure, got {other:?}"),
        }
        assert_eq!(h.llm.calls(), 1);
    }

    #[tokio::test]
    async fn transient_llm_errors_retry_within_the_attempt_budget() {
        let h = harness(QuotaConfig::default()).await;
        h.llm.push(Err(DriverError::Retryable("blip".into())));
        h.llm.push(Err(DriverError::Retryable("blip".into())));
        h.llm.push_text("third time lucky");

        assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
        assert_eq!(h.llm.calls(), 3);
        assert_eq!(h.posting.published()[0].1, "third time lucky");
    }

    #[tokio::test]
    async fn shutdown_mid_generation_aborts_without_record_damage() {
        let start = Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap();
        let h = harness_with(
            vec![tenant("a", start)],
            QuotaConfig::default(),
            PipelineConfig::default(),
            "{{persona}} slow update",
        )
        .await;
        // Exhaust scripted responses with retryable errors so the run
        // sits in backoff when shutdown lands.
        h.llm.push(Err(DriverError::Retryable("blip".into())));

        let tenant_id = quillcast_core::TenantId::new("a");
        let snapshot = h.registry.snapshot(&tenant_id).unwrap();
        let claim = h.claims.try_claim(&tenant_id).unwrap();
        let rx = h.shutdown_rx.clone();

        let run = tokio::spawn({
            let pipeline = Arc::clone(&h.pipeline);
            let item = WorkItem {
                tenant: snapshot,
                claim,
            };
            async move { pipeline.run(item, rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        h.shutdown_tx.send(true).unwrap();
        let outcome = run.await.unwrap();
        assert_eq!(outcome, JobOutcome::Aborted);
        assert_eq!(h.repo.posts()[0].status, PostStatus::Pending);
    }
}
