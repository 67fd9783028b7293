//! The generation pipeline.
//!
//! One [`GenerationPipeline::run`] call takes a scheduler work item
//! through admission, optional knowledge context, prompt rendering, the
//! semantic cache (with single-flight coalescing), the LLM, validation,
//! publish admission, and the posting backend, transitioning the post
//! record exactly along its legal edges. Every external call is
//! time-bounded and cancellable through the engine's shutdown signal.

pub mod config;
pub mod events;
pub mod pipeline;
pub mod retry;

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use events::PipelineEvent;
pub use pipeline::{GenerationPipeline, JobOutcome, PipelineDeps};
pub use retry::{ExponentialBackoff, FixedInterval, IntervalFunction};
