//! The rule chain.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// A candidate post under validation.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    /// The generated text, whitespace-normalized by the caller.
    pub text: &'a str,
    /// The tenant's most recent published texts, newest first.
    pub recent_posts: &'a [String],
}

/// Result of one rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    /// The candidate is acceptable but worth flagging.
    Warn(String),
    /// The candidate is rejected; the chain stops here.
    Fail(String),
}

/// Why the chain did not produce a verdict.
#[derive(Debug, Clone, Error)]
pub enum ValidationFailure {
    /// A rule rejected the candidate. Terminal for the post.
    #[error("rejected by {rule}: {reason}")]
    Rejected { rule: &'static str, reason: String },

    /// The safety classifier could not be reached. Transient for the
    /// job, not a judgment on the content.
    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
}

/// A chain's successful verdict.
#[derive(Debug, Clone, Default)]
pub struct Verdict {
    pub warnings: Vec<String>,
}

/// One validation rule.
#[async_trait]
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, candidate: &Candidate<'_>) -> Result<RuleOutcome, ValidationFailure>;
}

/// Ordered rule chain. Rules run in insertion order; the first `Fail`
/// aborts with [`ValidationFailure::Rejected`].
pub struct ValidatorChain {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ValidatorChain {
    pub fn new(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub async fn run(&self, candidate: &Candidate<'_>) -> Result<Verdict, ValidationFailure> {
        let mut verdict = Verdict::default();
        for rule in &self.rules {
            match rule.check(candidate).await? {
                RuleOutcome::Pass => {}
                RuleOutcome::Warn(reason) => {
                    debug!(rule = rule.name(), reason = %reason, "validation warning");
                    verdict.warnings.push(format!("{}: {}", rule.name(), reason));
                }
                RuleOutcome::Fail(reason) => {
                    return Err(ValidationFailure::Rejected {
                        rule: rule.name(),
                        reason,
                    });
                }
            }
        }
        Ok(verdict)
    }
}
