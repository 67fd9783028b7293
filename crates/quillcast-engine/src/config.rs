//! Engine configuration.

use std::time::Duration;

use quillcast_cache::CacheConfig;
use quillcast_core::ConfigError;
use quillcast_pipeline::PipelineConfig;
use quillcast_ratelimit::QuotaConfig;
use quillcast_validate::ValidatorConfig;

/// Process-wide engine settings, aggregating the component configs.
pub struct EngineConfig {
    pub(crate) workers: Option<usize>,
    pub(crate) shutdown_grace: Duration,
    pub(crate) reconcile_interval: Duration,
    pub(crate) sweep_interval: Duration,
    pub(crate) quotas: QuotaConfig,
    pub(crate) cache: CacheConfig,
    pub(crate) validator: ValidatorConfig,
    pub(crate) pipeline: PipelineConfig,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("builder defaults are valid"))
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    workers: Option<usize>,
    shutdown_grace: Duration,
    reconcile_interval: Duration,
    sweep_interval: Duration,
    quotas: QuotaConfig,
    cache: Option<CacheConfig>,
    validator: ValidatorConfig,
    pipeline: Option<PipelineConfig>,
}

impl EngineConfigBuilder {
    /// Defaults:
    /// - workers: `min(32, 2 × active_tenants)`, computed at start
    /// - shutdown_grace: 30 s
    /// - reconcile_interval: 30 s
    /// - sweep_interval: 60 s
    /// - component configs: their own defaults
    pub fn new() -> Self {
        Self {
            workers: None,
            shutdown_grace: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            quotas: QuotaConfig::default(),
            cache: None,
            validator: ValidatorConfig::default(),
            pipeline: None,
        }
    }

    /// Fixes the worker count instead of deriving it from the tenant
    /// count.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// How long in-flight jobs get to finish before they are aborted.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn quotas(mut self, quotas: QuotaConfig) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        Ok(EngineConfig {
            workers: self.workers,
            shutdown_grace: self.shutdown_grace,
            reconcile_interval: self.reconcile_interval,
            sweep_interval: self.sweep_interval,
            quotas: self.quotas,
            cache: self.cache.unwrap_or_default(),
            validator: self.validator,
            pipeline: self.pipeline.unwrap_or_default(),
        })
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
