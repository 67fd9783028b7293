//! Engine errors.

use quillcast_core::ConfigError;
use quillcast_drivers::DriverError;
use quillcast_tenants::RepositoryError;
use thiserror::Error;

/// Start-up and operator-surface failures. Anything surfaced here at
/// start-up aborts the engine; per-job failures never reach this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("repository unavailable at start-up: {0}")]
    Repository(#[from] RepositoryError),

    #[error("driver call failed: {0}")]
    Driver(#[from] DriverError),

    #[error("post {0} cannot be retracted: {1}")]
    NotRetractable(quillcast_core::PostId, String),
}
