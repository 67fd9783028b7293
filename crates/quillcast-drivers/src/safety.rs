//! Content-safety classifier driver.

use async_trait::async_trait;

use crate::error::DriverError;

/// Scores text for policy risk. Higher is riskier; the validator fails
/// a candidate whose score reaches its configured threshold.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn score(&self, text: &str) -> Result<f32, DriverError>;
}
