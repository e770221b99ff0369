//! Remote vocal-separation clients.
//!
//! Submission returns as soon as the provider has accepted the work; status
//! checks are single non-blocking requests. Repeated polling and the overall
//! time budget belong to the orchestrator.

use async_trait::async_trait;

use demusify_core::{ArtifactRef, FailureKind, InferenceHandle};

use crate::artifacts::ArtifactError;

pub mod dry_run;
pub mod replicate;

pub use dry_run::DryRunInferenceClient;
pub use replicate::{ReplicateClient, ReplicateConfig};

/// Where a finished separation can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteArtifact {
    /// Downloadable URL returned by the provider.
    Url(String),
    /// Already present in local artifact storage.
    Stored(ArtifactRef),
}

/// Why the provider gave up on a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// The provider does not know the handle (anymore). Never retry it.
    Expired(String),
    /// The provider ran the job and reports failure or cancellation.
    Remote(String),
}

impl RemoteFailure {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            RemoteFailure::Expired(_) => FailureKind::Expired,
            RemoteFailure::Remote(_) => FailureKind::InferenceFailed,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RemoteFailure::Expired(msg) | RemoteFailure::Remote(msg) => msg,
        }
    }
}

/// Result of a single status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceStatus {
    Running { remote_status: String },
    Completed(RemoteArtifact),
    Failed(RemoteFailure),
}

/// Inference client error.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    /// Transient network/auth/server problem while submitting. Safe to retry.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),
    /// The provider refused the request itself. Retrying will not help.
    #[error("submission rejected: {0}")]
    Rejected(String),
    /// A status check could not be completed (the job itself may be fine).
    #[error("status check failed: {0}")]
    Status(String),
    /// The finished artifact is unusable or gone.
    #[error("fetching result failed: {0}")]
    Fetch(String),
    /// The download was cut short (network, 5xx, rate limit). The output may still be there.
    #[error("result download interrupted: {0}")]
    FetchInterrupted(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl InferenceError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, InferenceError::SubmissionFailed(_))
    }

    /// Poll-time errors that say nothing about the job itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Status(_) | InferenceError::FetchInterrupted(_)
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            InferenceError::SubmissionFailed(_) | InferenceError::Rejected(_) => {
                FailureKind::SubmissionFailed
            }
            InferenceError::Status(_)
            | InferenceError::Fetch(_)
            | InferenceError::FetchInterrupted(_) => FailureKind::InferenceFailed,
            InferenceError::Artifact(_) => FailureKind::Storage,
        }
    }
}

/// Remote vocal-separation service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Provider name, matching [`InferenceHandle::provider`].
    fn provider(&self) -> &'static str;

    /// Hand the audio to the provider and return its job handle.
    async fn submit(&self, audio: &ArtifactRef) -> Result<InferenceHandle, InferenceError>;

    /// One status check for `handle`.
    async fn check_status(&self, handle: &InferenceHandle)
    -> Result<InferenceStatus, InferenceError>;

    /// Copy a finished separation into local storage at `dest`.
    async fn fetch_result(
        &self,
        artifact: &RemoteArtifact,
        dest: &ArtifactRef,
    ) -> Result<(), InferenceError>;
}
