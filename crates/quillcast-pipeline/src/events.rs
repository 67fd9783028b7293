//! Pipeline observability events.

use std::time::{Duration, Instant};

use quillcast_core::{EngineEvent, TenantId};
use quillcast_tenants::FailureKind;

/// Emitted once per work item with its terminal outcome.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Published {
        tenant: TenantId,
        timestamp: Instant,
    },
    Deferred {
        tenant: TenantId,
        retry_after: Duration,
        timestamp: Instant,
    },
    Failed {
        tenant: TenantId,
        kind: FailureKind,
        timestamp: Instant,
    },
    Aborted {
        tenant: TenantId,
        timestamp: Instant,
    },
}

impl EngineEvent for PipelineEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::Published { .. } => "job_published",
            PipelineEvent::Deferred { .. } => "job_deferred",
            PipelineEvent::Failed { .. } => "job_failed",
            PipelineEvent::Aborted { .. } => "job_aborted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            PipelineEvent::Published { timestamp, .. }
            | PipelineEvent::Deferred { timestamp, .. }
            | PipelineEvent::Failed { timestamp, .. }
            | PipelineEvent::Aborted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        "pipeline"
    }
}
