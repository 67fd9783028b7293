//! Tenant and post domain model, the repository interface, and the
//! in-memory tenant registry.
//!
//! The repository owns durable truth; the [`TenantRegistry`] keeps
//! read-optimized snapshots in memory, batches completion write-backs,
//! and reconciles from the repository on an interval.

pub mod error;
pub mod post;
pub mod registry;
pub mod repository;
pub mod tenant;

pub use error::{RegistryError, RepositoryError};
pub use post::{FailureKind, Post, PostFailure, PostStatus, PostTransition};
pub use registry::{CompletionOutcome, TenantRegistry};
pub use repository::{MemoryRepository, Repository};
pub use tenant::{ActedAt, DailyCounters, PostingWindows, Tenant};
