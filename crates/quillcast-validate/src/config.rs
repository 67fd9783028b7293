//! Validator configuration.

use std::sync::Arc;

use quillcast_core::ConfigError;
use quillcast_drivers::SafetyClassifier;

use crate::chain::ValidatorChain;
use crate::rules::{DuplicationRule, LengthRule, NonEmptyRule, SafetyRule};

/// Settings for the default rule chain.
#[derive(Clone)]
pub struct ValidatorConfig {
    pub(crate) post_max_len: usize,
    pub(crate) history_len: usize,
    pub(crate) safety_fail_threshold: f32,
    pub(crate) safety_warn_threshold: f32,
}

impl ValidatorConfig {
    pub fn builder() -> ValidatorConfigBuilder {
        ValidatorConfigBuilder::new()
    }

    /// How many recent published posts feed the duplication rule.
    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn post_max_len(&self) -> usize {
        self.post_max_len
    }

    /// Builds the default chain: non-empty, length, content safety,
    /// duplication, in that order.
    pub fn into_chain(self, classifier: Arc<dyn SafetyClassifier>) -> ValidatorChain {
        ValidatorChain::new(vec![
            Box::new(NonEmptyRule),
            Box::new(LengthRule {
                max_chars: self.post_max_len,
            }),
            Box::new(SafetyRule {
                classifier,
                fail_threshold: self.safety_fail_threshold,
                warn_threshold: self.safety_warn_threshold,
            }),
            Box::new(DuplicationRule),
        ])
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        ValidatorConfigBuilder::new()
            .build()
            .unwrap_or_else(|_| unreachable!("builder defaults are valid"))
    }
}

/// Builder for [`ValidatorConfig`].
pub struct ValidatorConfigBuilder {
    post_max_len: usize,
    history_len: usize,
    safety_fail_threshold: f32,
    safety_warn_threshold: f32,
}

impl ValidatorConfigBuilder {
    /// Defaults:
    /// - post_max_len: 280 chars
    /// - history_len: 10 posts
    /// - safety_fail_threshold: 0.8
    /// - safety_warn_threshold: 0.5
    pub fn new() -> Self {
        Self {
            post_max_len: 280,
            history_len: 10,
            safety_fail_threshold: 0.8,
            safety_warn_threshold: 0.5,
        }
    }

    pub fn post_max_len(mut self, max: usize) -> Self {
        self.post_max_len = max;
        self
    }

    pub fn history_len(mut self, n: usize) -> Self {
        self.history_len = n;
        self
    }

    pub fn safety_fail_threshold(mut self, threshold: f32) -> Self {
        self.safety_fail_threshold = threshold;
        self
    }

    pub fn safety_warn_threshold(mut self, threshold: f32) -> Self {
        self.safety_warn_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<ValidatorConfig, ConfigError> {
        if self.post_max_len == 0 {
            return Err(ConfigError::invalid("post_max_len", "must be nonzero"));
        }
        if !(0.0..=1.0).contains(&self.safety_fail_threshold) {
            return Err(ConfigError::invalid(
                "safety_fail_threshold",
                "must be within [0, 1]",
            ));
        }
        if self.safety_warn_threshold > self.safety_fail_threshold {
            return Err(ConfigError::invalid(
                "safety_warn_threshold",
                "must not exceed safety_fail_threshold",
            ));
        }
        Ok(ValidatorConfig {
            post_max_len: self.post_max_len,
            history_len: self.history_len,
            safety_fail_threshold: self.safety_fail_threshold,
            safety_warn_threshold: self.safety_warn_threshold,
        })
    }
}

impl Default for ValidatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
