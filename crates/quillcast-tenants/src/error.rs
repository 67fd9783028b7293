//! Repository and registry errors.

use quillcast_core::{PostId, TenantId};
use thiserror::Error;

use crate::post::PostStatus;

/// Failure from the durable repository.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The backing store cannot be reached. Transient.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    #[error("tenant {0} not found")]
    TenantNotFound(TenantId),

    #[error("post {0} not found")]
    PostNotFound(PostId),

    /// The conditional status update was rejected. The record is left
    /// untouched.
    #[error("illegal post transition from {from:?} to {to:?}")]
    IllegalTransition { from: PostStatus, to: PostStatus },
}

/// Failure updating in-memory tenant state.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("tenant {0} is not in the registry")]
    UnknownTenant(TenantId),

    /// A completion's monotonic timestamp did not advance past the
    /// tenant's previous one.
    #[error("completion for tenant {0} is not monotonic")]
    NonMonotonicCompletion(TenantId),
}
