//! Rendering and prompt hashing.

use std::fmt;

use hashbrown::HashMap;
use sha2::{Digest, Sha256};

use crate::error::TemplateError;
use crate::template::{PromptTemplate, TemplateStore};

/// Variable name reserved for the tenant's persona prompt.
pub const PERSONA_VAR: &str = "persona";

/// Hex-encoded SHA-256 of a normalized prompt. The cache's exact key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PromptHash(String);

impl PromptHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PromptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PromptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromptHash({}…)", &self.0[..12.min(self.0.len())])
    }
}

/// A rendered prompt and its stable hash.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub text: String,
    pub hash: PromptHash,
}

/// Collapses whitespace runs to single spaces and trims the ends.
/// Hashing normalized text makes the cache key insensitive to
/// formatting noise between otherwise identical prompts.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 over the normalized text, hex-encoded.
pub fn prompt_hash(text: &str) -> PromptHash {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    PromptHash(hex)
}

/// Resolves templates against variable maps.
pub struct Renderer {
    store: TemplateStore,
}

impl Renderer {
    pub fn new(store: TemplateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Renders `template_name` with `vars`, injecting `persona` under
    /// the reserved variable. Every placeholder must resolve and the
    /// result must fit the template's declared maximum length.
    pub fn render(
        &self,
        template_name: &str,
        vars: &HashMap<String, String>,
        persona: &str,
    ) -> Result<RenderedPrompt, TemplateError> {
        if vars.contains_key(PERSONA_VAR) {
            return Err(TemplateError::ReservedVariable(PERSONA_VAR.to_string()));
        }
        let template = self
            .store
            .get(template_name)
            .ok_or_else(|| TemplateError::UnknownTemplate(template_name.to_string()))?;

        let text = substitute(template, vars, persona)?;
        if text.chars().count() > template.max_length {
            return Err(TemplateError::TooLong {
                template: template.name.clone(),
                len: text.chars().count(),
                max: template.max_length,
            });
        }
        let hash = prompt_hash(&text);
        Ok(RenderedPrompt { text, hash })
    }
}

fn substitute(
    template: &PromptTemplate,
    vars: &HashMap<String, String>,
    persona: &str,
) -> Result<String, TemplateError> {
    let body = &template.body;
    let mut out = String::with_capacity(body.len());
    let mut rest = body.as_str();

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(TemplateError::UnterminatedPlaceholder {
                template: template.name.clone(),
            });
        };
        let name = after[..end].trim();
        if name == PERSONA_VAR {
            out.push_str(persona);
        } else {
            let value = vars.get(name).ok_or_else(|| TemplateError::MissingVariable {
                template: template.name.clone(),
                variable: name.to_string(),
            })?;
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}
