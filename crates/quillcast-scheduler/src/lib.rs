//! Tenant selection.
//!
//! On each tick the [`Scheduler`] computes the set of eligible tenants
//! (active, inside their posting window, under their daily limits, not
//! already claimed), orders it least-recently-acted-first, and drains as
//! many work items as the worker pool and the global daily budget allow.
//! Selection is a pure function of its inputs, so identical state yields
//! identical decisions.

pub mod claim;
pub mod scheduler;

pub use claim::{ClaimSet, TenantClaim};
pub use scheduler::{Scheduler, TickPlan, WorkItem};
