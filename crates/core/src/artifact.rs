//! References to stored media artifacts.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Storage key of an artifact (upload, intermediate stream or final video).
///
/// Keys are relative, `/`-separated and never climb out of the storage root.
/// The referenced bytes are owned by the storage backend, not by the `Job`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub const INPUT_DIR: &'static str = "input";
    pub const WORKING_DIR: &'static str = "working";
    pub const OUTPUT_DIR: &'static str = "output";

    pub fn new(key: impl Into<String>) -> DomainResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(DomainError::validation("artifact key is empty"));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(DomainError::validation(format!(
                "artifact key must be relative: {key}"
            )));
        }
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(DomainError::validation(format!(
                "artifact key has an invalid segment: {key}"
            )));
        }
        Ok(Self(key))
    }

    /// Key of a freshly uploaded source video.
    pub fn upload(job_id: JobId, extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        let ext = if ext.is_empty() { "mp4".to_string() } else { ext };
        Self(format!("{}/{job_id}.{ext}", Self::INPUT_DIR))
    }

    /// Key of the final merged video of a job.
    pub fn output(job_id: JobId) -> Self {
        Self(format!("{}/{job_id}_nomusic.mp4", Self::OUTPUT_DIR))
    }

    /// Derive a sibling artifact key in `dir`, named after this artifact's stem.
    ///
    /// `input/abc.mov`.derive("working", "audio.mp3") == `working/abc_audio.mp3`
    pub fn derive(&self, dir: &str, suffix: &str) -> Self {
        Self(format!("{dir}/{}_{suffix}", self.stem()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without directory or extension.
    pub fn stem(&self) -> &str {
        let file = self.file_name();
        match file.rfind('.') {
            Some(0) | None => file,
            Some(idx) => &file[..idx],
        }
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Lower-cased extension, if any.
    pub fn extension(&self) -> Option<String> {
        let file = self.file_name();
        match file.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < file.len() => {
                Some(file[idx + 1..].to_ascii_lowercase())
            }
            _ => None,
        }
    }
}

impl core::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ArtifactRef> for String {
    fn from(value: ArtifactRef) -> Self {
        value.0
    }
}
