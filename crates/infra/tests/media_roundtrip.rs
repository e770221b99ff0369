//! Split then merge a synthetic clip with real ffmpeg/ffprobe.
//!
//! Skipped when the binaries are not on `PATH`.

use std::path::Path;
use std::sync::Arc;

use demusify_core::{ArtifactRef, JobId};
use demusify_infra::artifacts::{ArtifactStore, LocalArtifactStore};
use demusify_infra::media::{
    FfmpegConfig, FfmpegMuxer, FfmpegProbe, FfmpegSplitter, MediaError, MediaMuxer, MediaProbe,
    MediaSplitter,
};

fn tools_available() -> bool {
    ["ffmpeg", "ffprobe"].iter().all(|bin| {
        std::process::Command::new(bin)
            .arg("-version")
            .output()
            .is_ok_and(|out| out.status.success())
    })
}

/// Render `secs` of test pattern plus a sine tone into `path`.
fn synth_clip(path: &Path, video_secs: u32, audio_secs: u32) {
    let status = std::process::Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={video_secs}:size=160x120:rate=10"))
        .args(["-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=440:duration={audio_secs}"))
        .args(["-c:v", "mpeg4", "-c:a", "aac"])
        .arg(path)
        .status()
        .unwrap();
    assert!(status.success());
}

struct Media {
    store: Arc<LocalArtifactStore>,
    probe: FfmpegProbe,
    splitter: FfmpegSplitter,
    muxer: FfmpegMuxer,
    _dir: tempfile::TempDir,
}

async fn media() -> Media {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalArtifactStore::open(dir.path()).await.unwrap());
    let config = FfmpegConfig::default();
    Media {
        probe: FfmpegProbe::new(store.clone(), config.clone()),
        splitter: FfmpegSplitter::new(store.clone(), config.clone()),
        muxer: FfmpegMuxer::new(store.clone(), config),
        store,
        _dir: dir,
    }
}

async fn upload(m: &Media, video_secs: u32, audio_secs: u32) -> ArtifactRef {
    let source = ArtifactRef::upload(JobId::new(), "mp4");
    let path = m.store.prepare(&source).await.unwrap();
    synth_clip(&path, video_secs, audio_secs);
    source
}

#[tokio::test]
async fn split_then_merge_preserves_duration() {
    if !tools_available() {
        eprintln!("ffmpeg/ffprobe not found; skipping");
        return;
    }
    let m = media().await;
    let source = upload(&m, 2, 2).await;
    let original = m.probe.probe(&source).await.unwrap();
    assert!(original.has_video && original.has_audio);
    let d = original.duration_secs.unwrap();

    let split = m.splitter.split(&source).await.unwrap();
    assert!(m.store.exists(&split.audio).await.unwrap());
    let video_only = m.probe.probe(&split.video_only).await.unwrap();
    assert!(video_only.has_video && !video_only.has_audio);

    // The split audio stands in for the separated vocals.
    let output = ArtifactRef::output(JobId::new());
    let result = m
        .muxer
        .merge(&split.video_only, &split.audio, &output)
        .await
        .unwrap();
    let merged = m.probe.probe(&result).await.unwrap();
    assert!(merged.has_video && merged.has_audio);
    assert!((merged.duration_secs.unwrap() - d).abs() <= 0.5);
}

#[tokio::test]
async fn split_is_deterministic() {
    if !tools_available() {
        eprintln!("ffmpeg/ffprobe not found; skipping");
        return;
    }
    let m = media().await;
    let first = upload(&m, 2, 2).await;
    let second = ArtifactRef::upload(JobId::new(), "mp4");
    m.store.copy(&first, &second).await.unwrap();

    let a = m.splitter.split(&first).await.unwrap();
    let b = m.splitter.split(&second).await.unwrap();
    assert_eq!(
        m.store.get(&a.audio).await.unwrap(),
        m.store.get(&b.audio).await.unwrap()
    );
    assert_eq!(
        m.probe.probe(&a.video_only).await.unwrap().duration_secs,
        m.probe.probe(&b.video_only).await.unwrap().duration_secs
    );
}

#[tokio::test]
async fn merge_refuses_drifting_audio() {
    if !tools_available() {
        eprintln!("ffmpeg/ffprobe not found; skipping");
        return;
    }
    let m = media().await;
    let short = m.splitter.split(&upload(&m, 2, 2).await).await.unwrap();
    let long = m.splitter.split(&upload(&m, 5, 5).await).await.unwrap();

    let output = ArtifactRef::output(JobId::new());
    let err = m
        .muxer
        .merge(&short.video_only, &long.audio, &output)
        .await
        .unwrap_err();
    assert!(matches!(err, MediaError::DurationMismatch { .. }));
    assert!(!m.store.exists(&output).await.unwrap());
}

#[tokio::test]
async fn garbage_is_unsupported() {
    if !tools_available() {
        eprintln!("ffmpeg/ffprobe not found; skipping");
        return;
    }
    let m = media().await;
    let source = ArtifactRef::upload(JobId::new(), "mp4");
    m.store.put(&source, b"definitely not a video").await.unwrap();

    assert!(m.probe.probe(&source).await.is_err());
    let err = m.splitter.split(&source).await.unwrap_err();
    assert!(matches!(err, MediaError::UnsupportedFormat(_)));
}
