//! LLM completion and embedding drivers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Sampling parameters for a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.8,
        }
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Other,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Total tokens billed for the call, when the backend reports it.
    pub token_usage: u32,
    pub finish_reason: FinishReason,
}

/// Text-completion backend.
#[async_trait]
pub trait LlmDriver: Send + Sync {
    /// Human-readable backend name, for logs and health.
    fn name(&self) -> &str;

    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Completion, DriverError>;
}

/// Text-embedding backend. May be the same service as the LLM driver or
/// a distinct one.
#[async_trait]
pub trait EmbeddingDriver: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, DriverError>;
}
