//! Named, versioned prompt templates.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// A prompt template. Placeholders use `{{name}}` syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub version: u32,
    pub body: String,
    /// Upper bound on the rendered character count.
    pub max_length: usize,
}

impl PromptTemplate {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        body: impl Into<String>,
        max_length: usize,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            body: body.into(),
            max_length,
        }
    }
}

/// Registry of templates by name. Inserting a lower version than the
/// stored one is a no-op, so reloads cannot roll a template back.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: HashMap<String, PromptTemplate>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, template: PromptTemplate) {
        match self.templates.get(&template.name) {
            Some(existing) if existing.version > template.version => {}
            _ => {
                self.templates.insert(template.name.clone(), template);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
