//! Distributed token-bucket quotas.
//!
//! Quota state lives in a shared counter store so admission decisions
//! hold across every worker process of a deployment. Each bucket is a
//! continuously-refilled token counter; the [`RateLimitCoordinator`]
//! composes several buckets (global per-day, per-tenant per-day,
//! per-tenant per-second) into a single admit-or-defer decision.
//!
//! ```rust
//! use std::sync::Arc;
//! use quillcast_core::TenantId;
//! use quillcast_ratelimit::{Decision, MemoryCounterStore, QuotaConfig, RateLimitCoordinator};
//!
//! # async fn example() {
//! let store = Arc::new(MemoryCounterStore::new());
//! let quotas = QuotaConfig::builder()
//!     .client_daily_llm(50)
//!     .client_daily_posts(10)
//!     .build()
//!     .unwrap();
//! let coordinator = RateLimitCoordinator::new(store, quotas);
//!
//! let tenant = TenantId::new("acme");
//! match coordinator.admit_llm(&tenant, 0.0).await {
//!     Decision::Admit => { /* proceed to the LLM */ }
//!     Decision::Defer(_wait) => { /* come back later */ }
//! }
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod store;

pub use bucket::{BucketParams, BucketState, ConsumeOutcome};
pub use config::{QuotaConfig, QuotaConfigBuilder};
pub use coordinator::{Decision, RateLimitCoordinator};
pub use error::StoreError;
pub use key::BucketKey;
pub use store::{CounterStore, MemoryCounterStore};
