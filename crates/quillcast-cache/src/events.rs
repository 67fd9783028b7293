//! Cache observability events.

use std::time::Instant;

use quillcast_core::EngineEvent;

/// Emitted by [`SemanticCache`](crate::SemanticCache) lookups and
/// maintenance.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    ExactHit {
        timestamp: Instant,
    },
    SemanticHit {
        similarity: f32,
        timestamp: Instant,
    },
    Miss {
        timestamp: Instant,
    },
    Inserted {
        evicted: bool,
        timestamp: Instant,
    },
    Swept {
        removed: usize,
        timestamp: Instant,
    },
}

impl EngineEvent for CacheEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::ExactHit { .. } => "cache_exact_hit",
            CacheEvent::SemanticHit { .. } => "cache_semantic_hit",
            CacheEvent::Miss { .. } => "cache_miss",
            CacheEvent::Inserted { .. } => "cache_inserted",
            CacheEvent::Swept { .. } => "cache_swept",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CacheEvent::ExactHit { timestamp }
            | CacheEvent::SemanticHit { timestamp, .. }
            | CacheEvent::Miss { timestamp }
            | CacheEvent::Inserted { timestamp, .. }
            | CacheEvent::Swept { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        "cache"
    }
}
