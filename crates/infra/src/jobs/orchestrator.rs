//! Drives jobs through split, remote inference and merge.
//!
//! Submission runs the local split and the inference handshake inline, then
//! returns. Everything after that is pull-based: each `poll` performs at most
//! one status check and, when the provider is done, the merge. There are no
//! background tasks or timers.
//!
//! Two guards keep a job single-owner:
//! - a per-job async lock serializes steps inside this process;
//! - every write is a compare-and-swap on the stored state, so a writer that
//!   lost a race (another process, a stale read) backs off and reports what
//!   is stored instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use demusify_core::{
    ArtifactRef, DomainError, FailureKind, Job, JobId, JobState, sanitize_filename,
};

use super::retry::RetryPolicy;
use super::store::{JobStore, JobStoreError};
use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::inference::{InferenceClient, InferenceStatus};
use crate::media::{MediaMuxer, MediaProbe, MediaSplitter};

/// Container extensions accepted on upload.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

const DEFAULT_EXTENSION: &str = "mp4";

/// Orchestrator error.
///
/// Collaborator failures never show up here; they become a `Failed` job.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is still {state}")]
    InProgress { id: JobId, state: JobState },
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Longest a job may sit in `AwaitingInference` before it fails with `Timeout`.
    pub inference_timeout: Duration,
    /// Retry policy for `SubmissionFailed`.
    pub submit_retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            inference_timeout: Duration::from_secs(600),
            submit_retry: RetryPolicy::default(),
        }
    }
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub probe: Arc<dyn MediaProbe>,
    pub splitter: Arc<dyn MediaSplitter>,
    pub inference: Arc<dyn InferenceClient>,
    pub muxer: Arc<dyn MediaMuxer>,
}

pub struct JobOrchestrator {
    deps: Collaborators,
    settings: OrchestratorSettings,
    locks: Mutex<HashMap<JobId, Arc<tokio::sync::Mutex<()>>>>,
}

impl JobOrchestrator {
    pub fn new(deps: Collaborators, settings: OrchestratorSettings) -> Self {
        Self {
            deps,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.deps.artifacts
    }

    /// Accept an upload and drive it up to `AwaitingInference`.
    ///
    /// Only a bad upload is an error; in that case nothing is kept and no job
    /// exists. Split or submission failures yield a job in `Failed`.
    #[instrument(skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn submit(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
    ) -> Result<Job, OrchestratorError> {
        if bytes.is_empty() {
            return Err(OrchestratorError::InvalidInput("empty upload".to_string()));
        }
        let extension = upload_extension(filename)?;

        let id = JobId::new();
        let source = ArtifactRef::upload(id, &extension);
        self.deps.artifacts.put(&source, bytes).await?;

        if let Err(reason) = self.validate_upload(&source).await {
            warn!(job_id = %id, %reason, "upload rejected");
            self.discard_upload(&source).await;
            return Err(OrchestratorError::InvalidInput(reason));
        }

        let mut job = Job::new(id, source);
        if let Some(name) = filename {
            job = job.with_original_name(sanitize_filename(name));
        }
        if let Err(e) = self.deps.store.create(&job).await {
            self.discard_upload(&job.source_ref).await;
            return Err(e.into());
        }
        info!(job_id = %id, source = %job.source_ref, "job created");

        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let mut result = self.split(&mut job).await;
        if result.is_ok() && job.state == JobState::Splitting {
            result = self.submit_inference(&mut job).await;
        }

        drop(guard);
        drop(lock);
        self.release_lock_if_idle(id);
        result.map(|()| job)
    }

    /// Report a job's state, advancing it if the provider has news.
    #[instrument(skip(self))]
    pub async fn poll(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let job = self.load(id).await?;
        // Terminal jobs and jobs owned by an in-flight request are reported as stored.
        if job.state != JobState::AwaitingInference {
            return Ok(job);
        }

        let lock = self.lock_for(id);
        let guard = lock.lock().await;
        let result = self.step(id).await;
        drop(guard);
        drop(lock);
        self.release_lock_if_idle(id);
        result
    }

    /// One poll step; the caller holds the job lock.
    async fn step(&self, id: JobId) -> Result<Job, OrchestratorError> {
        // Another poll may have advanced the job while we waited.
        let mut job = self.load(id).await?;
        if job.state != JobState::AwaitingInference {
            return Ok(job);
        }
        match self.advance_inference(&mut job).await {
            Ok(()) => Ok(job),
            Err(OrchestratorError::Store(JobStoreError::StateConflict { found, .. })) => {
                debug!(job_id = %id, %found, "job advanced elsewhere");
                self.load(id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Remove a finished job together with every artifact it produced.
    ///
    /// Jobs still moving through the pipeline are refused.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;
        let result = self.remove(id).await;
        drop(guard);
        drop(lock);
        self.release_lock_if_idle(id);
        result
    }

    async fn remove(&self, id: JobId) -> Result<Job, OrchestratorError> {
        let job = self.load(id).await?;
        if !job.is_terminal() {
            return Err(OrchestratorError::InProgress {
                id,
                state: job.state,
            });
        }
        match self.deps.store.delete(id, job.state).await {
            Ok(()) => {}
            Err(JobStoreError::NotFound(_)) => return Err(OrchestratorError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }

        let artifacts = [
            Some(&job.source_ref),
            job.audio_ref.as_ref(),
            job.video_only_ref.as_ref(),
            job.clean_audio_ref.as_ref(),
            job.result_ref.as_ref(),
        ];
        for key in artifacts.into_iter().flatten() {
            if let Err(e) = self.deps.artifacts.delete(key).await {
                warn!(job_id = %id, artifact = %key, error = %e, "could not remove artifact");
            }
        }
        info!(job_id = %id, state = %job.state, "job deleted");
        Ok(job)
    }

    /// Stored record without side effects.
    pub async fn get(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.load(id).await
    }

    /// Most recent jobs first.
    pub async fn list(&self, limit: usize) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.deps.store.list(limit).await?)
    }

    /// Jobs stuck in `state` without an update for at least `max_age`.
    pub async fn stale(
        &self,
        state: JobState,
        max_age: Duration,
    ) -> Result<Vec<Job>, OrchestratorError> {
        let age = chrono::Duration::from_std(max_age)
            .map_err(|e| OrchestratorError::InvalidInput(format!("max age: {e}")))?;
        Ok(self.deps.store.list_stale(state, Utc::now() - age).await?)
    }

    async fn load(&self, id: JobId) -> Result<Job, OrchestratorError> {
        self.deps
            .store
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))
    }

    async fn validate_upload(&self, source: &ArtifactRef) -> Result<(), String> {
        let info = self
            .deps
            .probe
            .probe(source)
            .await
            .map_err(|e| format!("unreadable video: {e}"))?;
        if !info.has_video {
            return Err("upload has no video stream".to_string());
        }
        if !info.has_audio {
            return Err("upload has no audio stream".to_string());
        }
        Ok(())
    }

    async fn split(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        job.begin_split()?;
        self.persist(job, JobState::Created).await?;

        match self.deps.splitter.split(&job.source_ref).await {
            Ok(out) => {
                job.record_split(out.audio, out.video_only)?;
                self.persist(job, JobState::Splitting).await?;
                Ok(())
            }
            Err(e) => self.fail(job, e.failure_kind(), e.to_string()).await,
        }
    }

    async fn submit_inference(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        let Some(audio) = job.audio_ref.clone() else {
            return Err(DomainError::invariant("inference submission without audio").into());
        };
        let inference = &self.deps.inference;
        let audio = &audio;
        let job_id = job.id;
        let submitted = self
            .settings
            .submit_retry
            .run(
                move |attempt| async move {
                    debug!(%job_id, attempt, "submitting audio for separation");
                    inference.submit(audio).await
                },
                |e| e.is_retriable(),
            )
            .await;

        match submitted {
            Ok(handle) => {
                job.await_inference(handle)?;
                self.persist(job, JobState::Splitting).await?;
                info!(
                    job_id = %job.id,
                    handle = ?job.inference_handle,
                    "awaiting inference"
                );
                Ok(())
            }
            Err(e) => self.fail(job, e.failure_kind(), e.to_string()).await,
        }
    }

    async fn advance_inference(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let elapsed = job
            .inference_elapsed(now)
            .and_then(|d| d.to_std().ok())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.settings.inference_timeout {
            let msg = format!(
                "no result after {}s (budget {}s)",
                elapsed.as_secs(),
                self.settings.inference_timeout.as_secs()
            );
            return self.fail(job, FailureKind::Timeout, msg).await;
        }

        let Some(handle) = job.inference_handle.clone() else {
            return self
                .fail(job, FailureKind::Expired, "no inference handle recorded")
                .await;
        };

        let status = match self.deps.inference.check_status(&handle).await {
            Ok(status) => status,
            Err(e) => {
                // The job is fine; the timeout budget bounds how long this can go on.
                warn!(job_id = %job.id, %handle, error = %e, "status check failed");
                return Ok(());
            }
        };

        match status {
            InferenceStatus::Running { remote_status } => {
                debug!(job_id = %job.id, %handle, %remote_status, "inference still running");
                job.record_poll(remote_status);
                self.persist(job, JobState::AwaitingInference).await
            }
            InferenceStatus::Failed(failure) => {
                let kind = failure.failure_kind();
                self.fail(job, kind, failure.message().to_string()).await
            }
            InferenceStatus::Completed(artifact) => {
                let clean = job
                    .source_ref
                    .derive(ArtifactRef::WORKING_DIR, "vocals.mp3");
                if let Err(e) = self.deps.inference.fetch_result(&artifact, &clean).await {
                    if e.is_transient() {
                        warn!(job_id = %job.id, %handle, error = %e, "result download failed, will retry on next poll");
                        return Ok(());
                    }
                    return self.fail(job, e.failure_kind(), e.to_string()).await;
                }
                job.record_poll("succeeded");
                job.begin_merge(clean)?;
                self.persist(job, JobState::AwaitingInference).await?;
                info!(job_id = %job.id, clean_audio = ?job.clean_audio_ref, "inference completed, merging");
                self.merge(job).await
            }
        }
    }

    async fn merge(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        let (Some(video_only), Some(clean)) = (job.video_only_ref.clone(), job.clean_audio_ref.clone())
        else {
            return self
                .fail(job, FailureKind::MergeFailed, "missing split or clean audio artifact")
                .await;
        };

        let output = ArtifactRef::output(job.id);
        match self.deps.muxer.merge(&video_only, &clean, &output).await {
            Ok(result) => {
                job.complete(result)?;
                self.persist(job, JobState::Merging).await?;
                info!(job_id = %job.id, result = ?job.result_ref, "job ready");
                Ok(())
            }
            Err(e) => self.fail(job, e.failure_kind(), e.to_string()).await,
        }
    }

    async fn discard_upload(&self, source: &ArtifactRef) {
        if let Err(e) = self.deps.artifacts.delete(source).await {
            warn!(artifact = %source, error = %e, "could not remove upload");
        }
    }

    async fn fail(
        &self,
        job: &mut Job,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        let from = job.state;
        let message = message.into();
        job.fail(kind, message.clone())?;
        self.persist(job, from).await?;
        warn!(job_id = %job.id, from = %from, kind = kind.as_str(), %message, "job failed");
        Ok(())
    }

    async fn persist(&self, job: &Job, expected: JobState) -> Result<(), OrchestratorError> {
        self.deps.store.update(job, expected).await?;
        Ok(())
    }

    fn lock_for(&self, id: JobId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop the lock entry once nobody else holds or waits on it.
    ///
    /// A later step simply creates a fresh lock; the store CAS still guards
    /// any overlap with a step that raced the removal.
    fn release_lock_if_idle(&self, id: JobId) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn upload_extension(filename: Option<&str>) -> Result<String, OrchestratorError> {
    let Some(name) = filename.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(DEFAULT_EXTENSION.to_string());
    };
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(OrchestratorError::InvalidInput(format!(
            "unsupported file type '{name}' (expected one of: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        )))
    }
}
