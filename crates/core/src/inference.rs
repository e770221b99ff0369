//! Opaque handles issued by remote inference providers.

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;

/// Handle of a separation job running at an inference provider.
///
/// Tagged by provider so that another provider is a new variant rather than a
/// change to the `Job` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum InferenceHandle {
    /// A Replicate prediction.
    Replicate { prediction_id: String },
    /// Local pass-through: the submitted audio is returned unchanged.
    DryRun { audio: ArtifactRef },
}

impl InferenceHandle {
    pub fn replicate(prediction_id: impl Into<String>) -> Self {
        Self::Replicate {
            prediction_id: prediction_id.into(),
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            InferenceHandle::Replicate { .. } => "replicate",
            InferenceHandle::DryRun { .. } => "dry_run",
        }
    }

    /// Provider-side identifier, for logs.
    pub fn external_id(&self) -> &str {
        match self {
            InferenceHandle::Replicate { prediction_id } => prediction_id,
            InferenceHandle::DryRun { audio } => audio.as_str(),
        }
    }
}

impl core::fmt::Display for InferenceHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.provider(), self.external_id())
    }
}
