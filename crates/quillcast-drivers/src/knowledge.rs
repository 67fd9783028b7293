//! Knowledge-store driver.

use async_trait::async_trait;

use crate::error::DriverError;

/// Optional per-tenant context store. A failure here is never fatal for
/// a job; the pipeline proceeds without context.
#[async_trait]
pub trait KnowledgeDriver: Send + Sync {
    /// Context snippets for `handle`, most relevant first.
    async fn fetch_context(&self, handle: &str) -> Result<Vec<String>, DriverError>;
}
