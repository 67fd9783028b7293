//! Posting-backend driver.

use async_trait::async_trait;
use quillcast_core::Credentials;

use crate::error::DriverError;

/// Receipt for a successfully published post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub external_id: String,
}

/// Social-posting backend.
#[async_trait]
pub trait PostingDriver: Send + Sync {
    async fn publish(
        &self,
        credentials: &Credentials,
        text: &str,
    ) -> Result<Published, DriverError>;

    /// Removes a previously published post. Used by operator tooling.
    async fn delete(
        &self,
        credentials: &Credentials,
        external_id: &str,
    ) -> Result<(), DriverError>;
}
