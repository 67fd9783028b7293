//! Counter-store errors.

use thiserror::Error;

/// Failure talking to the shared counter store. Always transient from
/// the caller's point of view: quota state is durable server-side, so
/// the right response is to defer and try again.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}
