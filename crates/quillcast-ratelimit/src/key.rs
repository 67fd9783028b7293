//! Namespaced bucket keys.

use std::fmt;

use quillcast_core::TenantId;

/// Identifies one token bucket in the counter store.
///
/// Keys render to stable namespaced strings (`llm:sec:<tenant>`,
/// `llm:day:<tenant>`, `llm:day:global`, `post:day:<tenant>`). Bucket
/// lifetime is independent from tenant lifetime; stale buckets are
/// reclaimed by the store's TTL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BucketKey {
    /// Per-tenant LLM pacing, one-second granularity.
    LlmSecond(TenantId),
    /// Per-tenant LLM calls per day.
    LlmDay(TenantId),
    /// Deployment-wide LLM calls per day.
    LlmDayGlobal,
    /// Per-tenant published posts per day.
    PostDay(TenantId),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::LlmSecond(t) => write!(f, "llm:sec:{t}"),
            BucketKey::LlmDay(t) => write!(f, "llm:day:{t}"),
            BucketKey::LlmDayGlobal => f.write_str("llm:day:global"),
            BucketKey::PostDay(t) => write!(f, "post:day:{t}"),
        }
    }
}
