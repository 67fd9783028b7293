//! Engine assembly, background tasks, and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use quillcast_cache::SemanticCache;
use quillcast_core::{calendar, PostId, SharedClock, TenantId};
use quillcast_drivers::{
    EmbeddingDriver, KnowledgeDriver, LlmDriver, PostingDriver, SafetyClassifier,
};
use quillcast_pipeline::{GenerationPipeline, JobOutcome, PipelineDeps};
use quillcast_prompt::{Renderer, TemplateStore};
use quillcast_ratelimit::{CounterStore, RateLimitCoordinator};
use quillcast_scheduler::{ClaimSet, Scheduler, WorkItem};
use quillcast_tenants::{PostStatus, Repository, TenantRegistry};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::health::{EngineState, HealthBoard, HealthSnapshot};

/// Floor for the scheduler's sleep so a zero wakeup cannot spin.
const MIN_TICK: Duration = Duration::from_millis(50);

/// Hard cap on the worker pool when it is derived from the tenant count.
const MAX_DERIVED_WORKERS: usize = 32;

/// External collaborators handed to [`Engine::start`]. All engine-owned
/// from then on; nothing here outlives the handle as process-wide state.
pub struct EngineDeps {
    pub clock: SharedClock,
    pub counter_store: Arc<dyn CounterStore>,
    pub repository: Arc<dyn Repository>,
    pub llm: Arc<dyn LlmDriver>,
    pub embedder: Arc<dyn EmbeddingDriver>,
    pub posting: Arc<dyn PostingDriver>,
    pub knowledge: Option<Arc<dyn KnowledgeDriver>>,
    pub safety: Arc<dyn SafetyClassifier>,
    pub templates: TemplateStore,
}

struct Shared {
    clock: SharedClock,
    registry: Arc<TenantRegistry>,
    coordinator: Arc<RateLimitCoordinator>,
    health: HealthBoard,
    busy: AtomicUsize,
    workers: usize,
}

/// The engine entry point.
pub struct Engine;

impl Engine {
    /// Validates configuration, loads the tenant registry (repository
    /// failure here is fatal), and spawns the background tasks.
    pub async fn start(config: EngineConfig, deps: EngineDeps) -> Result<EngineHandle, EngineError> {
        let registry = Arc::new(TenantRegistry::load(Arc::clone(&deps.repository)).await?);
        let coordinator = Arc::new(RateLimitCoordinator::new(
            Arc::clone(&deps.counter_store),
            config.quotas.clone(),
        ));
        let cache = Arc::new(SemanticCache::new(config.cache));
        let history_len = config.validator.history_len();
        let validator = Arc::new(config.validator.into_chain(Arc::clone(&deps.safety)));

        let workers = config.workers.unwrap_or_else(|| {
            (registry.active_count() * 2).clamp(1, MAX_DERIVED_WORKERS)
        });
        info!(workers, tenants = registry.active_count(), "starting engine");

        let pipeline = Arc::new(GenerationPipeline::new(
            PipelineDeps {
                clock: Arc::clone(&deps.clock),
                coordinator: Arc::clone(&coordinator),
                registry: Arc::clone(&registry),
                repository: Arc::clone(&deps.repository),
                renderer: Arc::new(Renderer::new(deps.templates)),
                cache: Arc::clone(&cache),
                validator,
                llm: deps.llm,
                embedder: deps.embedder,
                posting: Arc::clone(&deps.posting),
                knowledge: deps.knowledge,
                history_len,
            },
            config.pipeline,
        ));

        let claims = ClaimSet::new();
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&registry),
            claims,
            config.quotas,
            config.reconcile_interval,
        ));

        let shared = Arc::new(Shared {
            clock: Arc::clone(&deps.clock),
            registry: Arc::clone(&registry),
            coordinator: Arc::clone(&coordinator),
            health: HealthBoard::new(),
            busy: AtomicUsize::new(0),
            workers,
        });

        let (drain_tx, drain_rx) = watch::channel(false);
        let (abort_tx, abort_rx) = watch::channel(false);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(workers);
        let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));
        let notify = Arc::new(Notify::new());

        let mut tasks = JoinSet::new();
        for worker_idx in 0..workers {
            tasks.spawn(worker_loop(
                worker_idx,
                Arc::clone(&shared),
                Arc::clone(&pipeline),
                Arc::clone(&work_rx),
                drain_rx.clone(),
                abort_rx.clone(),
                Arc::clone(&notify),
            ));
        }
        tasks.spawn(scheduler_loop(
            Arc::clone(&shared),
            Arc::clone(&scheduler),
            work_tx,
            drain_rx.clone(),
            Arc::clone(&notify),
        ));
        tasks.spawn(reconciler_loop(
            Arc::clone(&shared),
            config.reconcile_interval,
            drain_rx.clone(),
        ));
        tasks.spawn(sweeper_loop(
            Arc::clone(&shared),
            Arc::clone(&cache),
            config.sweep_interval,
            drain_rx,
        ));

        shared.health.set_state(EngineState::Running);
        Ok(EngineHandle {
            shared,
            repository: deps.repository,
            posting: deps.posting,
            drain_tx,
            abort_tx,
            tasks,
            shutdown_grace: config.shutdown_grace,
        })
    }
}

/// Handle to a running engine.
pub struct EngineHandle {
    shared: Arc<Shared>,
    repository: Arc<dyn Repository>,
    posting: Arc<dyn PostingDriver>,
    drain_tx: watch::Sender<bool>,
    abort_tx: watch::Sender<bool>,
    tasks: JoinSet<()>,
    shutdown_grace: Duration,
}

impl EngineHandle {
    /// Current health snapshot, including per-bucket remaining tokens.
    pub async fn health(&self) -> HealthSnapshot {
        let tenants: Vec<TenantId> = self
            .shared
            .registry
            .list_active()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let now_secs = calendar::epoch_secs(self.shared.clock.now_wall());
        let bucket_remaining_by_key = self
            .shared
            .coordinator
            .remaining_by_key(&tenants, now_secs)
            .await;

        HealthSnapshot {
            state: self.shared.health.state(),
            uptime: self.shared.clock.now_mono(),
            active_tenants: tenants.len(),
            workers_busy: self.shared.busy.load(Ordering::SeqCst),
            bucket_remaining_by_key,
            last_error_by_component: self.shared.health.errors(),
        }
    }

    /// Deletes a published post from the posting backend. Operator
    /// tooling surface; the record itself is kept for audit.
    pub async fn retract(&self, post_id: &PostId) -> Result<(), EngineError> {
        let post = self.repository.get_post(post_id).await?;
        if post.status != PostStatus::Published {
            return Err(EngineError::NotRetractable(
                post_id.clone(),
                "post is not published".to_string(),
            ));
        }
        let Some(external_id) = post.external_id else {
            return Err(EngineError::NotRetractable(
                post_id.clone(),
                "post has no external id".to_string(),
            ));
        };
        let Some(tenant) = self.shared.registry.snapshot(&post.tenant_id) else {
            return Err(EngineError::NotRetractable(
                post_id.clone(),
                "tenant is gone from the registry".to_string(),
            ));
        };
        self.posting.delete(&tenant.credentials, &external_id).await?;
        info!(post = %post_id, external = %external_id, "post retracted");
        Ok(())
    }

    /// Two-phase shutdown: drain in-flight work within the grace
    /// period, then abort whatever remains. Batched tenant write-backs
    /// are flushed either way.
    pub async fn shutdown(self) -> HealthSnapshot {
        let EngineHandle {
            shared,
            repository: _repository,
            posting: _posting,
            drain_tx,
            abort_tx,
            mut tasks,
            shutdown_grace,
        } = self;

        info!("engine draining");
        shared.health.set_state(EngineState::Draining);
        let _ = drain_tx.send(true);

        let drained = timeout(shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(err) = result {
                    if err.is_panic() {
                        warn!("engine task panicked during drain");
                    }
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(grace = ?shutdown_grace, "drain grace elapsed, aborting remaining jobs");
            let _ = abort_tx.send(true);
            let aborted = timeout(Duration::from_secs(2), async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if aborted.is_err() {
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
            }
        }

        if let Err(err) = shared.registry.flush().await {
            warn!(error = %err, "final tenant write-back flush failed");
        }
        shared.health.set_state(EngineState::Stopped);
        info!("engine stopped");

        HealthSnapshot {
            state: shared.health.state(),
            uptime: shared.clock.now_mono(),
            active_tenants: shared.registry.active_count(),
            workers_busy: 0,
            bucket_remaining_by_key: Default::default(),
            last_error_by_component: shared.health.errors(),
        }
    }
}

async fn worker_loop(
    worker_idx: usize,
    shared: Arc<Shared>,
    pipeline: Arc<GenerationPipeline>,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    drain_rx: watch::Receiver<bool>,
    abort_rx: watch::Receiver<bool>,
    notify: Arc<Notify>,
) {
    let mut drain = drain_rx;
    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                item = rx.recv() => item,
                _ = drain.wait_for(|stop| *stop) => None,
            }
        };
        let Some(item) = item else {
            break;
        };

        shared.busy.fetch_add(1, Ordering::SeqCst);
        gauge!("quillcast_workers_busy").set(shared.busy.load(Ordering::SeqCst) as f64);

        let outcome = pipeline.run(item, abort_rx.clone()).await;

        shared.busy.fetch_sub(1, Ordering::SeqCst);
        gauge!("quillcast_workers_busy").set(shared.busy.load(Ordering::SeqCst) as f64);

        match outcome {
            JobOutcome::Published { .. } => shared.health.record_ok("pipeline"),
            JobOutcome::Failed { ref post_id, kind } => {
                shared
                    .health
                    .record_error("pipeline", format!("post {post_id} failed: {kind}"));
            }
            JobOutcome::Deferred { retry_after } => {
                // Wake the scheduler once the deferral has passed.
                let notify = Arc::clone(&notify);
                let mut abort = abort_rx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = sleep(retry_after) => notify.notify_one(),
                        _ = abort.wait_for(|stop| *stop) => {}
                    }
                });
            }
            JobOutcome::Aborted => {}
        }
        // A freed worker is a dispatch opportunity.
        notify.notify_one();
    }
    debug!(worker_idx, "worker stopped");
}

async fn scheduler_loop(
    shared: Arc<Shared>,
    scheduler: Arc<Scheduler>,
    work_tx: mpsc::Sender<WorkItem>,
    drain_rx: watch::Receiver<bool>,
    notify: Arc<Notify>,
) {
    let mut drain = drain_rx;
    loop {
        if *drain.borrow() {
            break;
        }
        let now_wall = shared.clock.now_wall();
        let now_secs = calendar::epoch_secs(now_wall);
        let global_remaining = shared
            .coordinator
            .global_llm_remaining(now_secs)
            .await
            .unwrap_or(0.0);
        let idle = shared
            .workers
            .saturating_sub(shared.busy.load(Ordering::SeqCst));

        let plan = scheduler.plan(now_wall, idle, global_remaining);
        for item in plan.items {
            // A full feed means no worker is actually free; the claim
            // releases with the dropped item.
            if work_tx.try_send(item).is_err() {
                break;
            }
        }

        let wait = plan.next_wakeup.max(MIN_TICK);
        tokio::select! {
            _ = sleep(wait) => {}
            _ = notify.notified() => {}
            _ = drain.wait_for(|stop| *stop) => break,
        }
    }
    debug!("scheduler stopped");
    // Dropping the sender closes the worker feed.
}

async fn reconciler_loop(
    shared: Arc<Shared>,
    interval: Duration,
    drain_rx: watch::Receiver<bool>,
) {
    let mut drain = drain_rx;
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = drain.wait_for(|stop| *stop) => break,
        }
        match shared.registry.reconcile().await {
            Ok(()) => shared.health.record_ok("reconciler"),
            Err(err) => {
                warn!(error = %err, "registry reconcile failed");
                shared.health.record_error("reconciler", err.to_string());
            }
        }
    }
    debug!("reconciler stopped");
}

async fn sweeper_loop(
    shared: Arc<Shared>,
    cache: Arc<SemanticCache>,
    interval: Duration,
    drain_rx: watch::Receiver<bool>,
) {
    let mut drain = drain_rx;
    loop {
        tokio::select! {
            _ = sleep(interval) => {}
            _ = drain.wait_for(|stop| *stop) => break,
        }
        cache.sweep();

        let tenants: Vec<TenantId> = shared
            .registry
            .list_active()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let now_secs = calendar::epoch_secs(shared.clock.now_wall());
        for (key, remaining) in shared
            .coordinator
            .remaining_by_key(&tenants, now_secs)
            .await
        {
            gauge!("quillcast_bucket_remaining", "key" => key).set(remaining);
        }
    }
    debug!("sweeper stopped");
}
