use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use demusify_core::{Job, JobState};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SubmitQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub state: JobState,
}

/// Status payload for one video job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatusResponse {
    pub id: String,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    /// Present only when `state == Ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn video_location(job: &Job) -> String {
    format!("/videos/{}", job.id)
}

impl From<&Job> for VideoStatusResponse {
    fn from(job: &Job) -> Self {
        let ready = job.state == JobState::Ready && job.result_ref.is_some();
        Self {
            id: job.id.to_string(),
            state: job.state,
            original_name: job.original_name.clone(),
            result_url: ready.then(|| format!("{}/download", video_location(job))),
            error: job.error.as_ref().map(|e| e.message.clone()),
            error_kind: job.error.as_ref().map(|e| e.kind.as_str()),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demusify_core::{ArtifactRef, FailureKind, InferenceHandle, JobId};

    fn job() -> Job {
        let id = JobId::new();
        Job::new(id, ArtifactRef::upload(id, "mp4"))
    }

    #[test]
    fn ready_jobs_carry_a_result_url() {
        let mut job = job();
        job.begin_split().unwrap();
        job.record_split(
            ArtifactRef::new("working/a_audio.mp3").unwrap(),
            ArtifactRef::new("working/a_video.mp4").unwrap(),
        )
        .unwrap();
        job.await_inference(InferenceHandle::replicate("p")).unwrap();
        let waiting = serde_json::to_value(VideoStatusResponse::from(&job)).unwrap();
        assert_eq!(waiting["state"], "AwaitingInference");
        assert!(waiting.get("resultUrl").is_none());
        assert!(waiting.get("error").is_none());

        job.begin_merge(ArtifactRef::new("working/a_vocals.mp3").unwrap())
            .unwrap();
        job.complete(ArtifactRef::output(job.id)).unwrap();
        let ready = serde_json::to_value(VideoStatusResponse::from(&job)).unwrap();
        assert_eq!(ready["state"], "Ready");
        assert_eq!(ready["resultUrl"], format!("/videos/{}/download", job.id));
        assert!(ready["createdAt"].is_string());
    }

    #[test]
    fn failed_jobs_expose_reason_and_kind() {
        let mut job = job();
        job.fail(FailureKind::UnsupportedFormat, "no audio stream").unwrap();
        let body = serde_json::to_value(VideoStatusResponse::from(&job)).unwrap();
        assert_eq!(body["state"], "Failed");
        assert_eq!(body["error"], "no audio stream");
        assert_eq!(body["errorKind"], "unsupported_format");
    }
}
