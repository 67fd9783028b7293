//! Shared harness for the integration scenarios: a full pipeline wired
//! to in-memory fakes and a manual clock.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use quillcast_cache::{CacheConfig, SemanticCache};
use quillcast_core::{Clock, Credentials, ManualClock, TenantId};
use quillcast_drivers::fake::{FakeEmbedder, FakeKnowledge, FakeLlm, FakePosting, FakeSafety};
use quillcast_pipeline::{GenerationPipeline, JobOutcome, PipelineConfig, PipelineDeps};
use quillcast_prompt::{PromptTemplate, Renderer, TemplateStore};
use quillcast_ratelimit::{
    CounterStore, MemoryCounterStore, QuotaConfig, RateLimitCoordinator,
};
use quillcast_scheduler::{ClaimSet, Scheduler, WorkItem};
use quillcast_tenants::{MemoryRepository, PostingWindows, Repository, Tenant, TenantRegistry};
use quillcast_validate::ValidatorConfig;
use tokio::sync::watch;

pub const TEMPLATE: &str = "{{persona}}\n{{display_name}}: share one update.\n{{context}}";

pub fn ten_am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap()
}

pub fn tenant_in(id: &str, tz: Tz, hours: impl IntoIterator<Item = u8>) -> Tenant {
    let mut t = Tenant::new(
        TenantId::new(id),
        format!("Tenant {id}"),
        tz,
        PostingWindows::from_hours(hours),
        Credentials::new(format!("creds-{id}")),
        ten_am(),
    );
    t.persona_prompt = "You are concise.".to_string();
    t
}

pub struct Harness {
    pub pipeline: Arc<GenerationPipeline>,
    pub scheduler: Arc<Scheduler>,
    pub clock: Arc<ManualClock>,
    pub repo: Arc<MemoryRepository>,
    pub registry: Arc<TenantRegistry>,
    pub coordinator: Arc<RateLimitCoordinator>,
    pub llm: Arc<FakeLlm>,
    pub posting: Arc<FakePosting>,
    pub knowledge: Arc<FakeKnowledge>,
    pub claims: ClaimSet,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub struct HarnessOptions {
    pub tenants: Vec<Tenant>,
    pub quotas: QuotaConfig,
    pub pipeline: PipelineConfig,
    pub llm: FakeLlm,
    pub posting: FakePosting,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            tenants: vec![tenant_in("a", chrono_tz::UTC, 9..=17)],
            quotas: QuotaConfig::default(),
            pipeline: PipelineConfig::builder()
                .backoff_initial(Duration::from_millis(1))
                .build()
                .unwrap(),
            llm: FakeLlm::new(),
            posting: FakePosting::new(),
        }
    }
}

pub async fn harness(options: HarnessOptions) -> Harness {
    let clock = Arc::new(ManualClock::starting_at(ten_am()));

    let repo = Arc::new(MemoryRepository::new());
    for t in options.tenants {
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
        options.quotas.clone(),
    ));

    let mut templates = TemplateStore::new();
    templates.insert(PromptTemplate::new("post", 1, TEMPLATE, 1000));

    let llm = Arc::new(options.llm);
    let posting = Arc::new(options.posting);
    let knowledge = Arc::new(FakeKnowledge::new());
    let claims = ClaimSet::new();

    let deps = PipelineDeps {
        clock: clock.clone(),
        coordinator: coordinator.clone(),
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

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        claims.clone(),
        options.quotas,
        Duration::from_secs(30),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    Harness {
        pipeline: Arc::new(GenerationPipeline::new(deps, options.pipeline)),
        scheduler,
        clock,
        repo,
        registry,
        coordinator,
        llm,
        posting,
        knowledge,
        claims,
        shutdown_tx,
        shutdown_rx,
    }
}

impl Harness {
    /// Runs one scheduler tick and executes every dispatched item to
    /// completion, returning the outcomes in dispatch order.
    pub async fn tick(&self) -> Vec<JobOutcome> {
        let now_secs = quillcast_core::calendar::epoch_secs(self.clock.now_wall());
        let global = self
            .coordinator
            .global_llm_remaining(now_secs)
            .await
            .unwrap_or(0.0);
        let plan = self.scheduler.plan(self.clock.now_wall(), 4, global);

        let mut outcomes = Vec::new();
        for item in plan.items {
            outcomes.push(self.pipeline.run(item, self.shutdown_rx.clone()).await);
        }
        outcomes
    }

    /// Bypasses the scheduler and runs the pipeline for one tenant.
    pub async fn run_for(&self, id: &str) -> JobOutcome {
        let tenant_id = TenantId::new(id);
        let tenant = self.registry.snapshot(&tenant_id).expect("tenant exists");
        let claim = self.claims.try_claim(&tenant_id).expect("tenant unclaimed");
        self.pipeline
            .run(WorkItem { tenant, claim }, self.shutdown_rx.clone())
            .await
    }
}
