//! Response validation.
//!
//! A [`ValidatorChain`] applies an ordered list of rules to a candidate
//! post. Each rule passes, warns, or fails; the first failure aborts the
//! chain and is terminal for the post. Warnings accumulate and are
//! recorded on the published record.

pub mod chain;
pub mod config;
pub mod rules;

pub use chain::{Candidate, RuleOutcome, ValidationFailure, ValidationRule, ValidatorChain, Verdict};
pub use config::{ValidatorConfig, ValidatorConfigBuilder};
pub use rules::{normalize_for_compare, DuplicationRule, LengthRule, NonEmptyRule, SafetyRule};
