//! Artifact storage: uploads, intermediate streams and final videos.
//!
//! The pipeline only needs read/write-by-key semantics. Media tooling needs
//! real files, so the filesystem store also exposes local paths.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use demusify_core::ArtifactRef;

pub mod local;

pub use local::LocalArtifactStore;

/// Artifact storage error.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(ArtifactRef),
    #[error("io error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(key: impl ToString, source: std::io::Error) -> Self {
        Self::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// An artifact opened for streaming.
pub struct ArtifactReader {
    /// Size in bytes.
    pub len: u64,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl core::fmt::Debug for ArtifactReader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArtifactReader").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Key/value artifact storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write (or replace) an artifact.
    async fn put(&self, key: &ArtifactRef, bytes: &[u8]) -> Result<(), ArtifactError>;

    /// Read an artifact fully.
    async fn get(&self, key: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;

    async fn exists(&self, key: &ArtifactRef) -> Result<bool, ArtifactError>;

    /// Delete an artifact. Deleting a missing artifact is not an error.
    async fn delete(&self, key: &ArtifactRef) -> Result<(), ArtifactError>;

    /// Open an artifact for reading without buffering it whole.
    ///
    /// The default reads it fully; stores backed by files should override.
    async fn reader(&self, key: &ArtifactRef) -> Result<ArtifactReader, ArtifactError> {
        let bytes = self.get(key).await?;
        Ok(ArtifactReader {
            len: bytes.len() as u64,
            reader: Box::new(std::io::Cursor::new(bytes)),
        })
    }

    /// Copy an artifact to another key.
    async fn copy(&self, from: &ArtifactRef, to: &ArtifactRef) -> Result<(), ArtifactError> {
        let bytes = self.get(from).await?;
        self.put(to, &bytes).await
    }
}
