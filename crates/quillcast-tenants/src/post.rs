//! Post records and their status machine.

use chrono::{DateTime, Utc};
use quillcast_core::{PostId, TenantId};
use serde::{Deserialize, Serialize};

/// Durable status of a post record.
///
/// `Pending` is the only non-terminal state; the legal transitions are
/// `Pending → Published` and `Pending → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Published,
    Failed,
}

/// Failure classification persisted on a failed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    QuotaExceeded,
    Validation,
    Generation,
    Publish,
    Config,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureKind::QuotaExceeded => "quota_exceeded",
            FailureKind::Validation => "validation",
            FailureKind::Generation => "generation",
            FailureKind::Publish => "publish",
            FailureKind::Config => "config",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// A conditional status update. Applying a transition to a record whose
/// current status does not allow it is an error, never a write.
#[derive(Debug, Clone, PartialEq)]
pub enum PostTransition {
    Publish {
        text: String,
        external_id: String,
        published_at: DateTime<Utc>,
        warnings: Vec<String>,
    },
    Fail {
        failure: PostFailure,
        /// Generated text, when the job got far enough to have one.
        text: Option<String>,
    },
}

impl PostTransition {
    pub fn target_status(&self) -> PostStatus {
        match self {
            PostTransition::Publish { .. } => PostStatus::Published,
            PostTransition::Fail { .. } => PostStatus::Failed,
        }
    }
}

impl PostStatus {
    /// Whether a record in `self` may take `transition`.
    pub fn allows(self, transition: &PostTransition) -> bool {
        matches!(
            (self, transition),
            (PostStatus::Pending, PostTransition::Publish { .. })
                | (PostStatus::Pending, PostTransition::Fail { .. })
        )
    }
}

/// One unit of output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub tenant_id: TenantId,
    pub text: String,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub failure: Option<PostFailure>,
    /// Warn-level validation outcomes recorded on publish.
    pub warnings: Vec<String>,
}

impl Post {
    /// A fresh record in `Pending`.
    pub fn pending(id: PostId, tenant_id: TenantId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            text: String::new(),
            status: PostStatus::Pending,
            created_at,
            published_at: None,
            external_id: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    /// Applies `transition` in place. The caller (the repository) has
    /// already checked `allows`; this keeps the invariants
    /// `external_id set ⇔ published` and `failure set ⇔ failed`.
    pub fn apply(&mut self, transition: PostTransition) {
        match transition {
            PostTransition::Publish {
                text,
                external_id,
                published_at,
                warnings,
            } => {
                self.status = PostStatus::Published;
                self.text = text;
                self.external_id = Some(external_id);
                self.published_at = Some(published_at);
                self.warnings = warnings;
            }
            PostTransition::Fail { failure, text } => {
                self.status = PostStatus::Failed;
                self.failure = Some(failure);
                if let Some(text) = text {
                    self.text = text;
                }
            }
        }
    }
}
