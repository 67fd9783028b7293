//! The engine loop.
//!
//! [`Engine::start`] wires the registry, coordinator, cache, validator,
//! and pipeline together, spawns the bounded worker pool plus the
//! scheduler ticker, registry reconciler, and cache sweeper, and hands
//! back an [`EngineHandle`] for health inspection and two-phase
//! shutdown (drain within the grace period, then abort).

pub mod config;
pub mod engine;
pub mod error;
pub mod health;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{Engine, EngineDeps, EngineHandle};
pub use error::EngineError;
pub use health::{EngineState, HealthSnapshot};
