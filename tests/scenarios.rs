//! End-to-end scenarios over the pipeline and scheduler, driven by the
//! in-memory fakes and a manual clock.

mod common;

use std::time::Duration;

use common::{harness, tenant_in, ten_am, Harness, HarnessOptions};
use quillcast_core::{Clock, TenantId};
use quillcast_drivers::fake::{FakeLlm, FakePosting};
use quillcast_drivers::DriverError;
use quillcast_pipeline::JobOutcome;
use quillcast_ratelimit::QuotaConfig;
use quillcast_tenants::{DailyCounters, PostStatus};

async fn default_harness() -> Harness {
    harness(HarnessOptions::default()).await
}

// One tick at 10:00 inside a 9..17 window publishes exactly one post
// and stamps the tenant's completion.
#[tokio::test]
async fn one_tick_publishes_one_post() {
    let h = default_harness().await;

    let outcomes = h.tick().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], JobOutcome::Published { .. }));

    assert_eq!(h.llm.calls(), 1);
    assert_eq!(h.posting.published().len(), 1);

    let snapshot = h.registry.snapshot(&TenantId::new("a")).unwrap();
    let acted = snapshot.last_acted_at.expect("completion recorded");
    assert_eq!(acted.wall, ten_am());
    assert_eq!(snapshot.daily.posts, 1);
    assert_eq!(snapshot.daily.llm_calls, 1);
}

// A second selection half a second after the first is paced by the
// per-second bucket.
#[tokio::test]
async fn back_to_back_selection_is_paced() {
    let h = default_harness().await;

    assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
    h.clock.advance(Duration::from_millis(500));

    match h.run_for("a").await {
        JobOutcome::Deferred { retry_after } => {
            assert!(
                retry_after >= Duration::from_millis(450),
                "deferred only {retry_after:?}"
            );
        }
        other => panic!("expected pacing deferral, got {other:?}"),
    }
    assert_eq!(h.llm.calls(), 1);
}

// A tenant at its daily post cap is skipped until tenant-local
// midnight, after which the rolled counters admit it again.
#[tokio::test]
async fn daily_cap_skips_until_local_midnight() {
    let mut tenant = tenant_in("a", chrono_tz::UTC, 0..24);
    tenant.daily = DailyCounters {
        day_key: ten_am().date_naive(),
        llm_calls: 1,
        posts: 1,
        llm_tokens: 0,
    };
    let h = harness(HarnessOptions {
        tenants: vec![tenant],
        quotas: QuotaConfig::builder().client_daily_posts(1).build().unwrap(),
        ..HarnessOptions::default()
    })
    .await;

    assert!(h.tick().await.is_empty());

    // 14 hours later it is past local midnight; the day key rolls and
    // the tenant is eligible again.
    h.clock.advance(Duration::from_secs(14 * 3600));
    let outcomes = h.tick().await;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], JobOutcome::Published { .. }));
}

// Two tenants whose renders hash identically share one LLM call and
// publish identical text.
#[tokio::test]
async fn identical_renders_share_one_generation() {
    let mut a = tenant_in("a", chrono_tz::UTC, 0..24);
    let mut b = tenant_in("b", chrono_tz::UTC, 0..24);
    a.display_name = "Shared Voice".to_string();
    b.display_name = "Shared Voice".to_string();

    let h = harness(HarnessOptions {
        tenants: vec![a, b],
        ..HarnessOptions::default()
    })
    .await;

    let outcomes = h.tick().await;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, JobOutcome::Published { .. })));

    assert_eq!(h.llm.calls(), 1, "second render must be served from cache");
    let published = h.posting.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].1, published[1].1);
}

// A driver 429 defers the tenant for the hinted duration, leaves the
// record pending, and the tenant succeeds once the hint expires.
#[tokio::test]
async fn driver_rate_limit_honours_the_hint() {
    let llm = FakeLlm::new();
    llm.push(Err(DriverError::RateLimited {
        retry_after: Duration::from_secs(2),
    }));
    let h = harness(HarnessOptions {
        tenants: vec![tenant_in("a", chrono_tz::UTC, 0..24)],
        llm,
        ..HarnessOptions::default()
    })
    .await;

    match h.run_for("a").await {
        JobOutcome::Deferred { retry_after } => {
            assert_eq!(retry_after, Duration::from_secs(2));
        }
        other => panic!("expected deferral, got {other:?}"),
    }
    assert_eq!(h.repo.posts()[0].status, PostStatus::Pending);

    // Before the hint expires, the pacing bucket still blocks; no
    // second driver call is made.
    h.clock.advance(Duration::from_secs(1));
    assert!(matches!(
        h.tick().await.as_slice(),
        [JobOutcome::Deferred { .. }]
    ));
    assert_eq!(h.llm.calls(), 1);

    h.clock.advance(Duration::from_secs(2));
    assert!(matches!(
        h.tick().await.as_slice(),
        [JobOutcome::Published { .. }]
    ));
}

// Publishing retries around a transient backend failure and calls the
// backend exactly once for the successful attempt chain.
#[tokio::test]
async fn transient_publish_failure_is_retried_once() {
    let posting = FakePosting::new();
    posting.fail_next(DriverError::Retryable("socket reset".into()));
    let h = harness(HarnessOptions {
        posting,
        ..HarnessOptions::default()
    })
    .await;

    assert!(matches!(h.run_for("a").await, JobOutcome::Published { .. }));
    assert_eq!(h.posting.calls(), 2);
    assert_eq!(h.posting.published().len(), 1);

    let posts = h.repo.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].status, PostStatus::Published);
    assert!(posts[0].external_id.is_some());
}

// Concurrent work items with identical renders coalesce into a single
// in-flight LLM call whose result every waiter observes.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_renders_single_flight() {
    let mut a = tenant_in("a", chrono_tz::UTC, 0..24);
    let mut b = tenant_in("b", chrono_tz::UTC, 0..24);
    let mut c = tenant_in("c", chrono_tz::UTC, 0..24);
    for t in [&mut a, &mut b, &mut c] {
        t.display_name = "Shared Voice".to_string();
    }

    let h = harness(HarnessOptions {
        tenants: vec![a, b, c],
        llm: FakeLlm::new().with_delay(Duration::from_millis(100)),
        ..HarnessOptions::default()
    })
    .await;

    let mut joins = Vec::new();
    for id in ["a", "b", "c"] {
        let tenant_id = TenantId::new(id);
        let tenant = h.registry.snapshot(&tenant_id).unwrap();
        let claim = h.claims.try_claim(&tenant_id).unwrap();
        let pipeline = std::sync::Arc::clone(&h.pipeline);
        let rx = h.shutdown_rx.clone();
        joins.push(tokio::spawn(async move {
            pipeline
                .run(quillcast_scheduler::WorkItem { tenant, claim }, rx)
                .await
        }));
    }

    let mut published = 0;
    for join in joins {
        if matches!(join.await.unwrap(), JobOutcome::Published { .. }) {
            published += 1;
        }
    }
    assert_eq!(published, 3);
    assert_eq!(h.llm.calls(), 1, "waiters must share the leader's call");

    let texts: Vec<String> = h.posting.published().into_iter().map(|(_, t)| t).collect();
    assert_eq!(texts.len(), 3);
    assert!(texts.windows(2).all(|w| w[0] == w[1]));
}

// A publish retry first re-reads the record: when a prior attempt
// already yielded an external id, the backend is not called again.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_retry_noops_when_the_record_is_already_published() {
    let posting = FakePosting::new();
    posting.fail_next(DriverError::Retryable("connection dropped".into()));
    let h = harness(HarnessOptions {
        posting,
        pipeline: quillcast_pipeline::PipelineConfig::builder()
            .backoff_initial(Duration::from_millis(300))
            .build()
            .unwrap(),
        ..HarnessOptions::default()
    })
    .await;

    let tenant_id = TenantId::new("a");
    let tenant = h.registry.snapshot(&tenant_id).unwrap();
    let claim = h.claims.try_claim(&tenant_id).unwrap();
    let pipeline = std::sync::Arc::clone(&h.pipeline);
    let rx = h.shutdown_rx.clone();
    let run = tokio::spawn(async move {
        pipeline
            .run(quillcast_scheduler::WorkItem { tenant, claim }, rx)
            .await
    });

    // Wait out the first (failing) attempt, then mark the record
    // published out-of-band, as a prior attempt landing late would.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while h.posting.calls() == 0 {
        assert!(std::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let record = h.repo.posts().pop().expect("record created");
    use quillcast_tenants::{PostTransition, Repository};
    h.repo
        .update_post_status(
            &record.id,
            PostTransition::Publish {
                text: "landed earlier".to_string(),
                external_id: "prior-ext".to_string(),
                published_at: h.clock.now_wall(),
                warnings: vec![],
            },
        )
        .await
        .unwrap();

    match run.await.unwrap() {
        JobOutcome::Published { external_id, .. } => {
            assert_eq!(external_id, "prior-ext");
        }
        other => panic!("expected publish, got {other:?}"),
    }
    // Only the original failed attempt reached the backend.
    assert_eq!(h.posting.calls(), 1);
    assert!(h.posting.published().is_empty());
}

// Outside the posting window nothing is selected, and the plan's
// wakeup points at the opening hour.
#[tokio::test]
async fn nothing_runs_outside_the_window() {
    let h = harness(HarnessOptions {
        tenants: vec![tenant_in("a", chrono_tz::UTC, 12..=14)],
        ..HarnessOptions::default()
    })
    .await;

    assert!(h.tick().await.is_empty());
    assert_eq!(h.llm.calls(), 0);

    h.clock.advance(Duration::from_secs(2 * 3600));
    assert_eq!(h.tick().await.len(), 1);
}
