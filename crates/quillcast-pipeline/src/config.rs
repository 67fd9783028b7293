//! Pipeline configuration.

use std::time::Duration;

use quillcast_core::{ConfigError, EventListeners, FnListener};
use quillcast_tenants::FailureKind;

use crate::events::PipelineEvent;

/// Timeouts, retry bounds, and template selection for the pipeline.
pub struct PipelineConfig {
    pub(crate) template_name: String,
    pub(crate) llm_timeout: Duration,
    pub(crate) post_timeout: Duration,
    pub(crate) embed_timeout: Duration,
    pub(crate) knowledge_timeout: Duration,
    pub(crate) llm_attempts: usize,
    pub(crate) publish_attempts: usize,
    pub(crate) backoff_initial: Duration,
    pub(crate) backoff_cap: Duration,
    pub(crate) post_park_max: Duration,
    pub(crate) transient_defer: Duration,
    pub(crate) event_listeners: EventListeners<PipelineEvent>,
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("builder defaults are valid"))
    }
}

/// Builder for [`PipelineConfig`].
pub struct PipelineConfigBuilder {
    template_name: String,
    llm_timeout: Duration,
    post_timeout: Duration,
    embed_timeout: Duration,
    knowledge_timeout: Duration,
    llm_attempts: usize,
    publish_attempts: usize,
    backoff_initial: Duration,
    backoff_cap: Duration,
    post_park_max: Duration,
    transient_defer: Duration,
    event_listeners: EventListeners<PipelineEvent>,
}

impl PipelineConfigBuilder {
    /// Defaults:
    /// - template_name: `"post"`
    /// - llm_timeout: 30 s, post_timeout: 10 s
    /// - embed_timeout: 10 s, knowledge_timeout: 5 s
    /// - llm_attempts / publish_attempts: 3
    /// - backoff: exponential from 1 s, capped at 30 s
    /// - post_park_max: 5 min
    /// - transient_defer: 5 s
    pub fn new() -> Self {
        Self {
            template_name: "post".to_string(),
            llm_timeout: Duration::from_secs(30),
            post_timeout: Duration::from_secs(10),
            embed_timeout: Duration::from_secs(10),
            knowledge_timeout: Duration::from_secs(5),
            llm_attempts: 3,
            publish_attempts: 3,
            backoff_initial: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            post_park_max: Duration::from_secs(300),
            transient_defer: Duration::from_secs(5),
            event_listeners: EventListeners::new(),
        }
    }

    pub fn template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = name.into();
        self
    }

    pub fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    pub fn knowledge_timeout(mut self, timeout: Duration) -> Self {
        self.knowledge_timeout = timeout;
        self
    }

    /// Attempts per LLM call, including the first.
    pub fn llm_attempts(mut self, attempts: usize) -> Self {
        self.llm_attempts = attempts;
        self
    }

    /// Attempts per publish call, including the first.
    pub fn publish_attempts(mut self, attempts: usize) -> Self {
        self.publish_attempts = attempts;
        self
    }

    pub fn backoff_initial(mut self, initial: Duration) -> Self {
        self.backoff_initial = initial;
        self
    }

    pub fn backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    /// How long a validated post may wait for publish quota before it
    /// fails with `quota_exceeded`.
    pub fn post_park_max(mut self, max: Duration) -> Self {
        self.post_park_max = max;
        self
    }

    /// Deferral applied when a dependency is transiently unavailable.
    pub fn transient_defer(mut self, defer: Duration) -> Self {
        self.transient_defer = defer;
        self
    }

    /// Registers a callback on every published post.
    pub fn on_published<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PipelineEvent| {
                if matches!(event, PipelineEvent::Published { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback on every failed post.
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(FailureKind) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PipelineEvent| {
                if let PipelineEvent::Failed { kind, .. } = event {
                    f(*kind);
                }
            }));
        self
    }

    /// Registers a callback on every deferred work item.
    pub fn on_deferred<F>(mut self, f: F) -> Self
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &PipelineEvent| {
                if let PipelineEvent::Deferred { retry_after, .. } = event {
                    f(*retry_after);
                }
            }));
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        if self.template_name.is_empty() {
            return Err(ConfigError::invalid("template_name", "must not be empty"));
        }
        if self.llm_attempts == 0 {
            return Err(ConfigError::invalid("llm_attempts", "must be at least 1"));
        }
        if self.publish_attempts == 0 {
            return Err(ConfigError::invalid("publish_attempts", "must be at least 1"));
        }
        Ok(PipelineConfig {
            template_name: self.template_name,
            llm_timeout: self.llm_timeout,
            post_timeout: self.post_timeout,
            embed_timeout: self.embed_timeout,
            knowledge_timeout: self.knowledge_timeout,
            llm_attempts: self.llm_attempts,
            publish_attempts: self.publish_attempts,
            backoff_initial: self.backoff_initial,
            backoff_cap: self.backoff_cap,
            post_park_max: self.post_park_max,
            transient_defer: self.transient_defer,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
