//! Quota configuration.

use std::time::Duration;

use quillcast_core::ConfigError;

/// Deployment-wide quota settings.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub(crate) client_llm_per_sec: f64,
    pub(crate) client_daily_llm: u32,
    pub(crate) client_daily_posts: u32,
    pub(crate) global_daily_llm: u32,
    pub(crate) default_backoff: Duration,
}

impl QuotaConfig {
    pub fn builder() -> QuotaConfigBuilder {
        QuotaConfigBuilder::new()
    }

    pub fn client_daily_llm(&self) -> u32 {
        self.client_daily_llm
    }

    pub fn client_daily_posts(&self) -> u32 {
        self.client_daily_posts
    }

    pub fn global_daily_llm(&self) -> u32 {
        self.global_daily_llm
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("builder defaults are valid"))
    }
}

/// Builder for [`QuotaConfig`].
pub struct QuotaConfigBuilder {
    client_llm_per_sec: f64,
    client_daily_llm: u32,
    client_daily_posts: u32,
    global_daily_llm: u32,
    default_backoff: Duration,
}

impl QuotaConfigBuilder {
    /// Defaults:
    /// - client_llm_per_sec: 1
    /// - client_daily_llm: 50
    /// - client_daily_posts: 10
    /// - global_daily_llm: 10 000
    /// - default_backoff: 5 s
    pub fn new() -> Self {
        Self {
            client_llm_per_sec: 1.0,
            client_daily_llm: 50,
            client_daily_posts: 10,
            global_daily_llm: 10_000,
            default_backoff: Duration::from_secs(5),
        }
    }

    /// Hard per-tenant pacing for LLM calls, in calls per second.
    pub fn client_llm_per_sec(mut self, rate: f64) -> Self {
        self.client_llm_per_sec = rate;
        self
    }

    /// Per-tenant LLM calls per day.
    pub fn client_daily_llm(mut self, limit: u32) -> Self {
        self.client_daily_llm = limit;
        self
    }

    /// Per-tenant published posts per day.
    pub fn client_daily_posts(mut self, limit: u32) -> Self {
        self.client_daily_posts = limit;
        self
    }

    /// Deployment-wide LLM calls per day; bounds total spend.
    pub fn global_daily_llm(mut self, limit: u32) -> Self {
        self.global_daily_llm = limit;
        self
    }

    /// Deferral applied when the counter store is unreachable.
    pub fn default_backoff(mut self, backoff: Duration) -> Self {
        self.default_backoff = backoff;
        self
    }

    pub fn build(self) -> Result<QuotaConfig, ConfigError> {
        if self.client_llm_per_sec <= 0.0 || !self.client_llm_per_sec.is_finite() {
            return Err(ConfigError::invalid(
                "client_llm_per_sec",
                "must be a positive finite rate",
            ));
        }
        if self.client_daily_llm == 0 {
            return Err(ConfigError::invalid("client_daily_llm", "must be nonzero"));
        }
        if self.client_daily_posts == 0 {
            return Err(ConfigError::invalid("client_daily_posts", "must be nonzero"));
        }
        if self.global_daily_llm == 0 {
            return Err(ConfigError::invalid("global_daily_llm", "must be nonzero"));
        }
        Ok(QuotaConfig {
            client_llm_per_sec: self.client_llm_per_sec,
            client_daily_llm: self.client_daily_llm,
            client_daily_posts: self.client_daily_posts,
            global_daily_llm: self.global_daily_llm,
            default_backoff: self.default_backoff,
        })
    }
}

impl Default for QuotaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let config = QuotaConfig::default();
        assert_eq!(config.client_daily_llm(), 50);
        assert_eq!(config.client_daily_posts(), 10);
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(QuotaConfig::builder().client_daily_llm(0).build().is_err());
        assert!(QuotaConfig::builder().client_llm_per_sec(0.0).build().is_err());
    }
}
