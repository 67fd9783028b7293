//! Prompt templates and rendering.
//!
//! A [`PromptTemplate`] is named, versioned text with `{{variable}}`
//! placeholders and a declared maximum render length. Rendering resolves
//! every placeholder (missing variables are an error), injects the
//! tenant persona under the reserved `persona` variable, and produces a
//! stable [`PromptHash`] over the normalized text for the cache's exact
//! level.

pub mod error;
pub mod render;
pub mod template;

pub use error::TemplateError;
pub use render::{normalize, prompt_hash, PromptHash, RenderedPrompt, Renderer, PERSONA_VAR};
pub use template::{PromptTemplate, TemplateStore};
