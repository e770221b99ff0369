//! Wires storage, media tooling, inference and the job store from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use demusify_core::JobState;
use demusify_infra::artifacts::{ArtifactStore, LocalArtifactStore};
use demusify_infra::inference::{
    DryRunInferenceClient, InferenceClient, ReplicateClient, ReplicateConfig,
};
use demusify_infra::jobs::{
    Collaborators, InMemoryJobStore, JobOrchestrator, JobStore, OrchestratorSettings,
    RetryPolicy, SqliteJobStore,
};
use demusify_infra::media::{FfmpegConfig, FfmpegMuxer, FfmpegProbe, FfmpegSplitter};
use demusify_infra::{AppConfig, InferenceMode, JobStoreKind};

const MAX_SUBMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Shared state behind every handler.
pub struct AppServices {
    pub orchestrator: Arc<JobOrchestrator>,
    pub max_upload_bytes: usize,
}

impl AppServices {
    pub fn new(orchestrator: Arc<JobOrchestrator>, max_upload_bytes: usize) -> Self {
        Self {
            orchestrator,
            max_upload_bytes,
        }
    }
}

/// Build production services. `http` is the process-wide HTTP client.
pub async fn build_services(config: &AppConfig, http: reqwest::Client) -> anyhow::Result<AppServices> {
    let local = Arc::new(LocalArtifactStore::open(config.artifact_root()).await?);
    let artifacts: Arc<dyn ArtifactStore> = local.clone();

    let store: Arc<dyn JobStore> = match config.job_store {
        JobStoreKind::Sqlite => Arc::new(SqliteJobStore::open(&config.database_path()).await?),
        JobStoreKind::Memory => {
            warn!("JOB_STORE=memory: jobs are lost on restart");
            InMemoryJobStore::arc()
        }
    };

    let inference: Arc<dyn InferenceClient> = match &config.inference {
        InferenceMode::DryRun => {
            warn!("INFERENCE_DRY_RUN is set: audio is passed through unchanged");
            Arc::new(DryRunInferenceClient::new(artifacts.clone()))
        }
        InferenceMode::Replicate {
            base_url,
            api_token,
            model,
            stem,
        } => Arc::new(ReplicateClient::new(
            http,
            artifacts.clone(),
            ReplicateConfig {
                base_url: base_url.clone(),
                api_token: api_token.clone(),
                model: model.clone(),
                stem: stem.clone(),
            },
        )?),
    };

    let ffmpeg = FfmpegConfig {
        ffmpeg_bin: config.ffmpeg_bin.clone(),
        ffprobe_bin: config.ffprobe_bin.clone(),
        duration_tolerance_secs: config.duration_tolerance_secs,
    };

    let deps = Collaborators {
        store,
        artifacts,
        probe: Arc::new(FfmpegProbe::new(local.clone(), ffmpeg.clone())),
        splitter: Arc::new(FfmpegSplitter::new(local.clone(), ffmpeg.clone())),
        inference,
        muxer: Arc::new(FfmpegMuxer::new(local, ffmpeg)),
    };
    let settings = OrchestratorSettings {
        inference_timeout: config.inference_timeout,
        submit_retry: RetryPolicy::exponential(
            config.submit_max_attempts,
            config.submit_retry_base,
            MAX_SUBMIT_BACKOFF,
        ),
    };
    let orchestrator = Arc::new(JobOrchestrator::new(deps, settings));

    report_interrupted_jobs(&orchestrator).await;
    info!(
        provider = config.inference_label(),
        inference_timeout_secs = config.inference_timeout.as_secs(),
        "services ready"
    );

    Ok(AppServices::new(orchestrator, config.max_upload_bytes))
}

/// Jobs left mid-split or mid-merge by a previous process never move again.
async fn report_interrupted_jobs(orchestrator: &JobOrchestrator) {
    for state in [JobState::Splitting, JobState::Merging] {
        match orchestrator.stale(state, Duration::ZERO).await {
            Ok(jobs) if !jobs.is_empty() => {
                let ids: Vec<String> = jobs.iter().map(|j| j.id.to_string()).collect();
                warn!(%state, count = jobs.len(), ids = ?ids, "jobs interrupted by a previous shutdown");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "could not scan for interrupted jobs"),
        }
    }
}
