//! Driver error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Error surface shared by every driver.
///
/// The pipeline branches on the variant: `Retryable` gets exponential
/// backoff, `RateLimited` re-seeds the tenant's pacing bucket with the
/// backend's hint, everything else is terminal for the attempt.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// Network failure, 5xx, or a driver-declared transient condition.
    #[error("transient driver failure: {0}")]
    Retryable(String),

    /// Permanent rejection; retrying the same request cannot help.
    #[error("driver failure: {0}")]
    NonRetryable(String),

    /// The backend asked us to slow down.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The posting backend refused the text as a duplicate.
    #[error("posting backend rejected duplicate content")]
    DuplicateContent,
}

impl DriverError {
    /// Whether the pipeline may retry the call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Retryable(_) | DriverError::RateLimited { .. }
        )
    }
}
