//! Local media tooling: probing, stream splitting and remuxing.
//!
//! The pipeline treats ffmpeg/ffprobe as black boxes behind three traits so
//! the orchestrator can be exercised without the binaries installed.

use async_trait::async_trait;
use serde::Serialize;

use demusify_core::{ArtifactRef, FailureKind};

use crate::artifacts::ArtifactError;

pub mod ffmpeg;
mod tool;

pub use ffmpeg::{FfmpegConfig, FfmpegMuxer, FfmpegProbe, FfmpegSplitter};

/// Media tooling error.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("split failed: {0}")]
    SplitFailed(String),
    #[error("merge failed: {0}")]
    MergeFailed(String),
    #[error(
        "duration mismatch: video {video_secs:.3}s vs audio {audio_secs:.3}s (tolerance {tolerance_secs:.3}s)"
    )]
    DurationMismatch {
        video_secs: f64,
        audio_secs: f64,
        tolerance_secs: f64,
    },
    #[error("probe failed: {0}")]
    Probe(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

impl MediaError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            MediaError::UnsupportedFormat(_) | MediaError::Probe(_) => {
                FailureKind::UnsupportedFormat
            }
            MediaError::SplitFailed(_) => FailureKind::SplitFailed,
            MediaError::MergeFailed(_) => FailureKind::MergeFailed,
            MediaError::DurationMismatch { .. } => FailureKind::DurationMismatch,
            MediaError::Artifact(_) => FailureKind::Storage,
        }
    }
}

/// What ffprobe (or a stand-in) knows about a media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub duration_secs: Option<f64>,
    pub has_video: bool,
    pub has_audio: bool,
    pub format_name: Option<String>,
}

/// Outputs of a successful split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub audio: ArtifactRef,
    pub video_only: ArtifactRef,
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, artifact: &ArtifactRef) -> Result<MediaInfo, MediaError>;
}

/// Splits a video into an audio track and a video-only track.
///
/// Implementations must be deterministic: identical input bytes yield
/// streams of identical duration and alignment.
#[async_trait]
pub trait MediaSplitter: Send + Sync {
    async fn split(&self, video: &ArtifactRef) -> Result<SplitOutput, MediaError>;
}

/// Muxes a replacement audio track into a video-only track.
///
/// Implementations must refuse inputs whose durations differ by more than
/// their tolerance ([`MediaError::DurationMismatch`]).
#[async_trait]
pub trait MediaMuxer: Send + Sync {
    async fn merge(
        &self,
        video_only: &ArtifactRef,
        audio: &ArtifactRef,
        output: &ArtifactRef,
    ) -> Result<ArtifactRef, MediaError>;
}

/// Fail with `DurationMismatch` when two durations drift apart.
pub fn check_durations(
    video_secs: f64,
    audio_secs: f64,
    tolerance_secs: f64,
) -> Result<(), MediaError> {
    if (video_secs - audio_secs).abs() > tolerance_secs {
        return Err(MediaError::DurationMismatch {
            video_secs,
            audio_secs,
            tolerance_secs,
        });
    }
    Ok(())
}
