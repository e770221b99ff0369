//! The `Job` record and its state machine.
//!
//! ```text
//! Created -> Splitting -> AwaitingInference -> Merging -> Ready
//!    \           \               \                \
//!     `-----------`---------------`----------------`--> Failed
//! ```
//!
//! Transitions only move forward. `Failed` is absorbing and reachable from
//! every non-terminal state. Each transition method checks the edge, keeps the
//! per-state fields consistent and bumps `updated_at`; callers persist the
//! full record afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactRef;
use crate::error::{DomainError, DomainResult};
use crate::failure::{FailureKind, JobError};
use crate::id::JobId;
use crate::inference::InferenceHandle;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Splitting,
    AwaitingInference,
    Merging,
    Ready,
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Created,
        JobState::Splitting,
        JobState::AwaitingInference,
        JobState::Merging,
        JobState::Ready,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "Created",
            JobState::Splitting => "Splitting",
            JobState::AwaitingInference => "AwaitingInference",
            JobState::Merging => "Merging",
            JobState::Ready => "Ready",
            JobState::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Ready | JobState::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, Splitting)
            | (Splitting, AwaitingInference)
            | (AwaitingInference, Merging)
            | (Merging, Ready) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A video-processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Uploaded video.
    pub source_ref: ArtifactRef,
    /// Sanitized name of the uploaded file, if the client sent one.
    pub original_name: Option<String>,
    pub audio_ref: Option<ArtifactRef>,
    pub video_only_ref: Option<ArtifactRef>,
    /// Set only while `AwaitingInference`.
    pub inference_handle: Option<InferenceHandle>,
    /// Start of the inference budget; set only while `AwaitingInference`.
    pub inference_submitted_at: Option<DateTime<Utc>>,
    pub clean_audio_ref: Option<ArtifactRef>,
    /// Set only in `Ready`.
    pub result_ref: Option<ArtifactRef>,
    /// Set only in `Failed`.
    pub error: Option<JobError>,
    /// Last status string reported by the provider.
    pub last_remote_status: Option<String>,
    pub poll_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job for an uploaded video, in state `Created`.
    pub fn new(id: JobId, source_ref: ArtifactRef) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Created,
            source_ref,
            original_name: None,
            audio_ref: None,
            video_only_ref: None,
            inference_handle: None,
            inference_submitted_at: None,
            clean_audio_ref: None,
            result_ref: None,
            error: None,
            last_remote_status: None,
            poll_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.original_name = (!name.is_empty()).then_some(name);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// `Created -> Splitting`.
    pub fn begin_split(&mut self) -> DomainResult<()> {
        self.transition(JobState::Splitting)
    }

    /// Attach the split outputs. Only valid while `Splitting`; no state change.
    pub fn record_split(
        &mut self,
        audio_ref: ArtifactRef,
        video_only_ref: ArtifactRef,
    ) -> DomainResult<()> {
        if self.state != JobState::Splitting {
            return Err(DomainError::invariant(format!(
                "split outputs recorded in state {}",
                self.state
            )));
        }
        self.audio_ref = Some(audio_ref);
        self.video_only_ref = Some(video_only_ref);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `Splitting -> AwaitingInference`, holding the provider's handle.
    pub fn await_inference(&mut self, handle: InferenceHandle) -> DomainResult<()> {
        if self.audio_ref.is_none() || self.video_only_ref.is_none() {
            return Err(DomainError::invariant(
                "inference submitted before split outputs were recorded",
            ));
        }
        self.transition(JobState::AwaitingInference)?;
        self.inference_submitted_at = Some(self.updated_at);
        self.inference_handle = Some(handle);
        Ok(())
    }

    /// `AwaitingInference -> Merging`. The handle is dropped here.
    pub fn begin_merge(&mut self, clean_audio_ref: ArtifactRef) -> DomainResult<()> {
        self.transition(JobState::Merging)?;
        self.inference_handle = None;
        self.inference_submitted_at = None;
        self.clean_audio_ref = Some(clean_audio_ref);
        Ok(())
    }

    /// `Merging -> Ready`.
    pub fn complete(&mut self, result_ref: ArtifactRef) -> DomainResult<()> {
        self.transition(JobState::Ready)?;
        self.result_ref = Some(result_ref);
        Ok(())
    }

    /// `* -> Failed` from any non-terminal state.
    ///
    /// Artifact references stay in place so a later merge-only retry can find
    /// the clean audio.
    pub fn fail(&mut self, kind: FailureKind, message: impl Into<String>) -> DomainResult<()> {
        let failed_in = self.state;
        self.transition(JobState::Failed)?;
        self.inference_handle = None;
        self.inference_submitted_at = None;
        self.error = Some(JobError::new(kind, message, failed_in));
        Ok(())
    }

    /// Record a status check that did not change the state.
    pub fn record_poll(&mut self, remote_status: impl Into<String>) {
        self.poll_count = self.poll_count.saturating_add(1);
        self.last_remote_status = Some(remote_status.into());
    }

    /// Time spent waiting on the provider so far.
    pub fn inference_elapsed(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.inference_submitted_at.map(|at| now - at)
    }

    fn transition(&mut self, next: JobState) -> DomainResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
