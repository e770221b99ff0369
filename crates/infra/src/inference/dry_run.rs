use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use demusify_core::{ArtifactRef, InferenceHandle};

use super::{
    InferenceClient, InferenceError, InferenceStatus, RemoteArtifact, RemoteFailure,
};
use crate::artifacts::ArtifactStore;

/// Pass-through provider: "separates" by returning the submitted audio.
///
/// Useful for exercising split and merge without GPU credits.
pub struct DryRunInferenceClient {
    store: Arc<dyn ArtifactStore>,
}

impl DryRunInferenceClient {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl InferenceClient for DryRunInferenceClient {
    fn provider(&self) -> &'static str {
        "dry_run"
    }

    async fn submit(&self, audio: &ArtifactRef) -> Result<InferenceHandle, InferenceError> {
        if !self.store.exists(audio).await? {
            return Err(InferenceError::Rejected(format!("missing audio: {audio}")));
        }
        info!(audio = %audio, "dry run: skipping vocal isolation");
        Ok(InferenceHandle::DryRun {
            audio: audio.clone(),
        })
    }

    async fn check_status(
        &self,
        handle: &InferenceHandle,
    ) -> Result<InferenceStatus, InferenceError> {
        match handle {
            InferenceHandle::DryRun { audio } => {
                Ok(InferenceStatus::Completed(RemoteArtifact::Stored(audio.clone())))
            }
            other => Ok(InferenceStatus::Failed(RemoteFailure::Expired(format!(
                "handle {other} was not issued by the dry-run provider"
            )))),
        }
    }

    async fn fetch_result(
        &self,
        artifact: &RemoteArtifact,
        dest: &ArtifactRef,
    ) -> Result<(), InferenceError> {
        match artifact {
            RemoteArtifact::Stored(source) => Ok(self.store.copy(source, dest).await?),
            RemoteArtifact::Url(url) => Err(InferenceError::Fetch(format!(
                "dry-run provider cannot download {url}"
            ))),
        }
    }
}
