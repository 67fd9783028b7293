//! Cache configuration.

use std::time::Duration;

use quillcast_core::{ConfigError, EventListeners, FnListener};

use crate::events::CacheEvent;

/// Configuration for [`SemanticCache`](crate::SemanticCache).
pub struct CacheConfig {
    pub(crate) capacity: usize,
    pub(crate) ttl: Duration,
    pub(crate) similarity_threshold: f32,
    pub(crate) event_listeners: EventListeners<CacheEvent>,
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("builder defaults are valid"))
    }
}

/// Builder for [`CacheConfig`].
pub struct CacheConfigBuilder {
    capacity: usize,
    ttl: Duration,
    similarity_threshold: f32,
    event_listeners: EventListeners<CacheEvent>,
}

impl CacheConfigBuilder {
    /// Defaults:
    /// - capacity: 1000 entries
    /// - ttl: 24 h
    /// - similarity_threshold: 0.95
    pub fn new() -> Self {
        Self {
            capacity: 1000,
            ttl: Duration::from_secs(24 * 3600),
            similarity_threshold: 0.95,
            event_listeners: EventListeners::new(),
        }
    }

    /// Maximum entry count before LRU eviction.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Age after which an entry is dropped regardless of recency.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Minimum cosine similarity for a semantic hit.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Registers a callback on any cache hit (exact or semantic).
    pub fn on_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &CacheEvent| {
            if matches!(
                event,
                CacheEvent::ExactHit { .. } | CacheEvent::SemanticHit { .. }
            ) {
                f(event);
            }
        }));
        self
    }

    /// Registers a callback on a cache miss.
    pub fn on_miss<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(FnListener::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::Miss { .. }) {
                f();
            }
        }));
        self
    }

    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be nonzero"));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::invalid(
                "similarity_threshold",
                "must be within [0, 1]",
            ));
        }
        Ok(CacheConfig {
            capacity: self.capacity,
            ttl: self.ttl,
            similarity_threshold: self.similarity_threshold,
            event_listeners: self.event_listeners,
        })
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
