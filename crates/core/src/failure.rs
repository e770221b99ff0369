//! Failure taxonomy recorded on failed jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobState;

/// Why a job (or a submission) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad upload. Client error, never retried, never becomes a job.
    InvalidInput,
    /// The container/codec could not be demuxed.
    UnsupportedFormat,
    /// Local stream extraction failed.
    SplitFailed,
    /// The remote service did not accept the audio (after bounded retries).
    SubmissionFailed,
    /// The remote service reported a failed separation.
    InferenceFailed,
    /// The remote service no longer knows the handle.
    Expired,
    /// The job exceeded its inference budget.
    Timeout,
    /// Local remux failed.
    MergeFailed,
    /// Video and clean audio durations disagree beyond tolerance.
    DurationMismatch,
    /// Artifact storage or job persistence failed mid-pipeline.
    Storage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::SplitFailed => "split_failed",
            FailureKind::SubmissionFailed => "submission_failed",
            FailureKind::InferenceFailed => "inference_failed",
            FailureKind::Expired => "expired",
            FailureKind::Timeout => "timeout",
            FailureKind::MergeFailed => "merge_failed",
            FailureKind::DurationMismatch => "duration_mismatch",
            FailureKind::Storage => "storage",
        }
    }
}

impl core::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure stored on a job in state `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
    /// State the job was in when it failed.
    pub failed_in: JobState,
    pub occurred_at: DateTime<Utc>,
}

impl JobError {
    pub fn new(kind: FailureKind, message: impl Into<String>, failed_in: JobState) -> Self {
        Self {
            kind,
            message: message.into(),
            failed_in,
            occurred_at: Utc::now(),
        }
    }
}

impl core::fmt::Display for JobError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
