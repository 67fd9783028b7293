//! Driver interfaces the engine consumes.
//!
//! Each external system is reached through a narrow, object-safe async
//! trait with a shared error taxonomy ([`DriverError`]). Concrete HTTP
//! clients live outside the core; [`fake`] provides deterministic
//! in-memory implementations for tests and local runs.

pub mod error;
pub mod fake;
pub mod knowledge;
pub mod llm;
pub mod posting;
pub mod safety;

pub use error::DriverError;
pub use knowledge::KnowledgeDriver;
pub use llm::{Completion, EmbeddingDriver, FinishReason, GenerationParams, LlmDriver};
pub use posting::{PostingDriver, Published};
pub use safety::SafetyClassifier;
