//! ffmpeg/ffprobe-backed media adapters.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use demusify_core::ArtifactRef;

use super::tool::{self, ToolFailure};
use super::{
    MediaError, MediaInfo, MediaMuxer, MediaProbe, MediaSplitter, SplitOutput, check_durations,
};
use crate::artifacts::{ArtifactStore, LocalArtifactStore};

/// Binaries and tolerances for the ffmpeg adapters.
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Maximum allowed |video - audio| duration difference at merge time.
    pub duration_tolerance_secs: f64,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            duration_tolerance_secs: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    format_name: Option<String>,
}

fn parse_secs(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_probe_json(stdout: &[u8]) -> Result<MediaInfo, MediaError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| MediaError::Probe(format!("unreadable ffprobe output: {e}")))?;

    let has_stream = |kind: &str| {
        parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some(kind))
    };

    // Container duration first, then the longest stream duration.
    let duration_secs = parsed
        .format
        .as_ref()
        .and_then(|f| parse_secs(f.duration.as_deref()))
        .or_else(|| {
            parsed
                .streams
                .iter()
                .filter_map(|s| parse_secs(s.duration.as_deref()))
                .reduce(f64::max)
        });

    Ok(MediaInfo {
        duration_secs,
        has_video: has_stream("video"),
        has_audio: has_stream("audio"),
        format_name: parsed.format.and_then(|f| f.format_name),
    })
}

fn os_args<const N: usize>(args: [&str; N]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

/// `ffprobe` wrapper.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    store: Arc<LocalArtifactStore>,
    config: FfmpegConfig,
}

impl FfmpegProbe {
    pub fn new(store: Arc<LocalArtifactStore>, config: FfmpegConfig) -> Self {
        Self { store, config }
    }

    pub async fn probe_path(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let mut args = os_args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        args.push(path.as_os_str().to_owned());

        let stdout = tool::run(&self.config.ffprobe_bin, args)
            .await
            .map_err(|e| MediaError::Probe(e.to_string()))?;
        parse_probe_json(&stdout)
    }
}

#[async_trait]
impl MediaProbe for FfmpegProbe {
    async fn probe(&self, artifact: &ArtifactRef) -> Result<MediaInfo, MediaError> {
        if !self.store.exists(artifact).await? {
            return Err(MediaError::Probe(format!("missing artifact: {artifact}")));
        }
        self.probe_path(&self.store.path_of(artifact)).await
    }
}

/// Splits a video into `working/{stem}_audio.mp3` and `working/{stem}_video.{ext}`.
///
/// Audio is re-encoded to 2ch/44.1kHz MP3 at 320k; video is stream-copied.
/// Bit-exact flags and stripped metadata keep repeated runs identical.
#[derive(Debug, Clone)]
pub struct FfmpegSplitter {
    store: Arc<LocalArtifactStore>,
    probe: FfmpegProbe,
    config: FfmpegConfig,
}

impl FfmpegSplitter {
    pub fn new(store: Arc<LocalArtifactStore>, config: FfmpegConfig) -> Self {
        Self {
            probe: FfmpegProbe::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    pub fn outputs_for(video: &ArtifactRef) -> SplitOutput {
        let ext = video.extension().unwrap_or_else(|| "mp4".to_string());
        SplitOutput {
            audio: video.derive(ArtifactRef::WORKING_DIR, "audio.mp3"),
            video_only: video.derive(ArtifactRef::WORKING_DIR, &format!("video.{ext}")),
        }
    }

    async fn extract(&self, source: &Path, outputs: &SplitOutput) -> Result<(), ToolFailure> {
        let audio_path = self.store.path_of(&outputs.audio);
        let video_path = self.store.path_of(&outputs.video_only);

        let mut audio_args = os_args(["-y", "-hide_banner", "-loglevel", "error", "-i"]);
        audio_args.push(source.as_os_str().to_owned());
        audio_args.extend(os_args([
            "-map",
            "0:a:0",
            "-vn",
            "-ac",
            "2",
            "-ar",
            "44100",
            "-c:a",
            "libmp3lame",
            "-b:a",
            "320k",
            "-map_metadata",
            "-1",
            "-fflags",
            "+bitexact",
            "-flags:a",
            "+bitexact",
        ]));
        audio_args.push(audio_path.into_os_string());
        tool::run(&self.config.ffmpeg_bin, audio_args).await?;

        let mut video_args = os_args(["-y", "-hide_banner", "-loglevel", "error", "-i"]);
        video_args.push(source.as_os_str().to_owned());
        video_args.extend(os_args([
            "-map",
            "0:v:0",
            "-an",
            "-c:v",
            "copy",
            "-map_metadata",
            "-1",
            "-fflags",
            "+bitexact",
        ]));
        video_args.push(video_path.into_os_string());
        tool::run(&self.config.ffmpeg_bin, video_args).await?;

        Ok(())
    }
}

#[async_trait]
impl MediaSplitter for FfmpegSplitter {
    async fn split(&self, video: &ArtifactRef) -> Result<SplitOutput, MediaError> {
        let info = self
            .probe
            .probe(video)
            .await
            .map_err(|e| MediaError::UnsupportedFormat(e.to_string()))?;
        if !info.has_video || !info.has_audio {
            return Err(MediaError::UnsupportedFormat(format!(
                "{video} needs one video and one audio stream (video: {}, audio: {})",
                info.has_video, info.has_audio
            )));
        }

        let outputs = Self::outputs_for(video);
        self.store.prepare(&outputs.audio).await?;
        self.store.prepare(&outputs.video_only).await?;

        if let Err(e) = self.extract(&self.store.path_of(video), &outputs).await {
            warn!(source = %video, error = %e, "stream split failed");
            discard_partial(&self.store, &outputs).await;
            return Err(MediaError::SplitFailed(e.to_string()));
        }

        info!(source = %video, audio = %outputs.audio, video_only = %outputs.video_only, "streams split");
        Ok(outputs)
    }
}

/// Best-effort removal of whatever a failed split left behind.
async fn discard_partial(store: &LocalArtifactStore, outputs: &SplitOutput) {
    for key in [&outputs.audio, &outputs.video_only] {
        if let Err(e) = store.delete(key).await {
            warn!(artifact = %key, error = %e, "could not remove partial split output");
        }
    }
}

/// Remuxes a clean audio track into a video-only track.
///
/// Video is stream-copied, audio encoded to AAC, output cut to the shorter
/// stream. Inputs whose durations disagree beyond the tolerance are refused.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    store: Arc<LocalArtifactStore>,
    probe: FfmpegProbe,
    config: FfmpegConfig,
}

impl FfmpegMuxer {
    pub fn new(store: Arc<LocalArtifactStore>, config: FfmpegConfig) -> Self {
        Self {
            probe: FfmpegProbe::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    async fn duration_of(&self, artifact: &ArtifactRef) -> Result<f64, MediaError> {
        let info = self
            .probe
            .probe(artifact)
            .await
            .map_err(|e| MediaError::MergeFailed(e.to_string()))?;
        info.duration_secs
            .ok_or_else(|| MediaError::MergeFailed(format!("no duration for {artifact}")))
    }
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn merge(
        &self,
        video_only: &ArtifactRef,
        audio: &ArtifactRef,
        output: &ArtifactRef,
    ) -> Result<ArtifactRef, MediaError> {
        let video_secs = self.duration_of(video_only).await?;
        let audio_secs = self.duration_of(audio).await?;
        check_durations(video_secs, audio_secs, self.config.duration_tolerance_secs)?;

        let final_path = self.store.prepare(output).await?;
        let partial_path = final_path.with_file_name(format!(".{}.partial", output.file_name()));

        let mut args = os_args(["-y", "-hide_banner", "-loglevel", "error", "-i"]);
        args.push(self.store.path_of(video_only).into_os_string());
        args.push("-i".into());
        args.push(self.store.path_of(audio).into_os_string());
        args.extend(os_args([
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-shortest", "-f",
            "mp4",
        ]));
        args.push(partial_path.clone().into_os_string());

        if let Err(e) = tool::run(&self.config.ffmpeg_bin, args).await {
            let _ = tokio::fs::remove_file(&partial_path).await;
            warn!(video_only = %video_only, audio = %audio, error = %e, "merge failed");
            return Err(MediaError::MergeFailed(e.to_string()));
        }
        tokio::fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| MediaError::MergeFailed(format!("finalize {output}: {e}")))?;

        info!(output = %output, video_secs, audio_secs, "streams merged");
        Ok(output.clone())
    }
}
