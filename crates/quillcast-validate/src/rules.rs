//! The built-in rules.

use std::sync::Arc;

use async_trait::async_trait;
use quillcast_drivers::SafetyClassifier;

use crate::chain::{Candidate, RuleOutcome, ValidationFailure, ValidationRule};

/// Case-folds and collapses whitespace for duplicate comparison.
pub fn normalize_for_compare(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Rejects candidates that trim to nothing.
pub struct NonEmptyRule;

#[async_trait]
impl ValidationRule for NonEmptyRule {
    fn name(&self) -> &'static str {
        "non_empty"
    }

    async fn check(&self, candidate: &Candidate<'_>) -> Result<RuleOutcome, ValidationFailure> {
        if candidate.text.trim().is_empty() {
            Ok(RuleOutcome::Fail("text is empty".into()))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// Bounds the candidate's character count.
pub struct LengthRule {
    pub max_chars: usize,
}

#[async_trait]
impl ValidationRule for LengthRule {
    fn name(&self) -> &'static str {
        "length"
    }

    async fn check(&self, candidate: &Candidate<'_>) -> Result<RuleOutcome, ValidationFailure> {
        let len = candidate.text.chars().count();
        if len > self.max_chars {
            Ok(RuleOutcome::Fail(format!(
                "{len} chars exceeds the {} limit",
                self.max_chars
            )))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// Fails candidates whose classifier risk score reaches the threshold.
/// A warn band below the threshold surfaces borderline content without
/// blocking it.
pub struct SafetyRule {
    pub classifier: Arc<dyn SafetyClassifier>,
    pub fail_threshold: f32,
    pub warn_threshold: f32,
}

#[async_trait]
impl ValidationRule for SafetyRule {
    fn name(&self) -> &'static str {
        "content_safety"
    }

    async fn check(&self, candidate: &Candidate<'_>) -> Result<RuleOutcome, ValidationFailure> {
        let score = self
            .classifier
            .score(candidate.text)
            .await
            .map_err(|err| ValidationFailure::ClassifierUnavailable(err.to_string()))?;

        if score >= self.fail_threshold {
            Ok(RuleOutcome::Fail(format!("safety score {score:.2}")))
        } else if score >= self.warn_threshold {
            Ok(RuleOutcome::Warn(format!("safety score {score:.2}")))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}

/// Rejects a candidate equal (case-folded, whitespace-normalized) to any
/// of the tenant's recent published posts.
pub struct DuplicationRule;

#[async_trait]
impl ValidationRule for DuplicationRule {
    fn name(&self) -> &'static str {
        "duplication"
    }

    async fn check(&self, candidate: &Candidate<'_>) -> Result<RuleOutcome, ValidationFailure> {
        let normalized = normalize_for_compare(candidate.text);
        let duplicate = candidate
            .recent_posts
            .iter()
            .any(|prior| normalize_for_compare(prior) == normalized);
        if duplicate {
            Ok(RuleOutcome::Fail("duplicates a recent post".into()))
        } else {
            Ok(RuleOutcome::Pass)
        }
    }
}
