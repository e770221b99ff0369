//! Replicate HTTP API client.
//!
//! Flow: upload the audio through the files API, create a prediction for the
//! configured model, then poll `GET /predictions/{id}`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use demusify_core::{ArtifactRef, InferenceHandle};

use super::{
    InferenceClient, InferenceError, InferenceStatus, RemoteArtifact, RemoteFailure,
};
use crate::artifacts::ArtifactStore;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// Replicate connection settings.
#[derive(Clone)]
pub struct ReplicateConfig {
    pub base_url: String,
    pub api_token: String,
    /// `owner/name` (latest version) or `owner/name:version`.
    pub model: String,
    /// Stem requested from the separation model.
    pub stem: String,
}

impl core::fmt::Debug for ReplicateConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReplicateConfig")
            .field("base_url", &self.base_url)
            .field("api_token", &"<redacted>")
            .field("model", &self.model)
            .field("stem", &self.stem)
            .finish()
    }
}

/// Parsed model reference.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ModelRef<'a> {
    Latest { owner: &'a str, name: &'a str },
    Version(&'a str),
}

fn parse_model(model: &str) -> Option<ModelRef<'_>> {
    if let Some((_, version)) = model.split_once(':') {
        return (!version.is_empty()).then_some(ModelRef::Version(version));
    }
    let (owner, name) = model.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(ModelRef::Latest { owner, name })
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    urls: UploadedFileUrls,
}

#[derive(Debug, Deserialize)]
struct UploadedFileUrls {
    get: String,
}

/// Pick the vocals URL out of whatever shape the model returned:
/// a URL, a list of URLs, or an object keyed by stem.
fn extract_output_url(output: &Value, stem: &str) -> Option<String> {
    match output {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| extract_output_url(v, stem)),
        Value::Object(map) => map
            .get(stem)
            .and_then(|v| extract_output_url(v, stem))
            .or_else(|| map.values().find_map(|v| extract_output_url(v, stem))),
        _ => None,
    }
}

fn prediction_status(prediction: &Prediction, stem: &str) -> InferenceStatus {
    match prediction.status.as_str() {
        "succeeded" => match prediction
            .output
            .as_ref()
            .and_then(|o| extract_output_url(o, stem))
        {
            Some(url) => InferenceStatus::Completed(RemoteArtifact::Url(url)),
            None => InferenceStatus::Failed(RemoteFailure::Remote(format!(
                "prediction {} succeeded without a usable output",
                prediction.id
            ))),
        },
        "failed" | "canceled" => {
            let reason = match &prediction.error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => format!("prediction {}", prediction.status),
            };
            InferenceStatus::Failed(RemoteFailure::Remote(reason))
        }
        other => InferenceStatus::Running {
            remote_status: other.to_string(),
        },
    }
}

/// Map a non-success submission response onto retriable vs. fatal errors.
/// Statuses worth trying again later.
fn retriable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn submission_error(status: StatusCode, body: &str) -> InferenceError {
    let msg = format!("replicate returned {status}: {}", body.trim());
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || retriable_status(status)
    {
        InferenceError::SubmissionFailed(msg)
    } else {
        InferenceError::Rejected(msg)
    }
}

/// Replicate client.
///
/// The `reqwest::Client` is created once at startup and shared; this type
/// never builds its own.
pub struct ReplicateClient {
    http: reqwest::Client,
    store: Arc<dyn ArtifactStore>,
    config: ReplicateConfig,
}

impl ReplicateClient {
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn ArtifactStore>,
        config: ReplicateConfig,
    ) -> Result<Self, InferenceError> {
        if parse_model(&config.model).is_none() {
            return Err(InferenceError::Rejected(format!(
                "invalid model reference '{}': expected owner/name or owner/name:version",
                config.model
            )));
        }
        Ok(Self {
            http,
            store,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn upload(&self, audio: &ArtifactRef) -> Result<String, InferenceError> {
        let bytes = self.store.get(audio).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(audio.file_name().to_string())
            .mime_str("audio/mpeg")
            .map_err(|e| InferenceError::Rejected(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("content", part);

        let res = self
            .http
            .post(self.url("files"))
            .bearer_auth(&self.config.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| InferenceError::SubmissionFailed(format!("upload: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(submission_error(status, &body));
        }
        let file: UploadedFile = res
            .json()
            .await
            .map_err(|e| InferenceError::SubmissionFailed(format!("upload response: {e}")))?;
        Ok(file.urls.get)
    }
}

#[async_trait]
impl InferenceClient for ReplicateClient {
    fn provider(&self) -> &'static str {
        "replicate"
    }

    async fn submit(&self, audio: &ArtifactRef) -> Result<InferenceHandle, InferenceError> {
        let audio_url = self.upload(audio).await?;
        let input = json!({ "audio": audio_url, "stem": self.config.stem });

        let request = match parse_model(&self.config.model) {
            Some(ModelRef::Latest { owner, name }) => self
                .http
                .post(self.url(&format!("models/{owner}/{name}/predictions")))
                .json(&json!({ "input": input })),
            Some(ModelRef::Version(version)) => self
                .http
                .post(self.url("predictions"))
                .json(&json!({ "version": version, "input": input })),
            None => {
                return Err(InferenceError::Rejected(format!(
                    "invalid model reference '{}'",
                    self.config.model
                )));
            }
        };

        let res = request
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| InferenceError::SubmissionFailed(format!("create prediction: {e}")))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(submission_error(status, &body));
        }
        let prediction: Prediction = res
            .json()
            .await
            .map_err(|e| InferenceError::SubmissionFailed(format!("prediction response: {e}")))?;

        info!(
            audio = %audio,
            prediction_id = %prediction.id,
            status = %prediction.status,
            "replicate prediction created"
        );
        Ok(InferenceHandle::replicate(prediction.id))
    }

    async fn check_status(
        &self,
        handle: &InferenceHandle,
    ) -> Result<InferenceStatus, InferenceError> {
        let InferenceHandle::Replicate { prediction_id } = handle else {
            return Ok(InferenceStatus::Failed(RemoteFailure::Expired(format!(
                "handle {handle} was not issued by replicate"
            ))));
        };

        let res = self
            .http
            .get(self.url(&format!("predictions/{prediction_id}")))
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| InferenceError::Status(e.to_string()))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            warn!(prediction_id = %prediction_id, %status, "replicate no longer knows prediction");
            return Ok(InferenceStatus::Failed(RemoteFailure::Expired(format!(
                "prediction {prediction_id} not found ({status})"
            ))));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(InferenceError::Status(format!(
                "replicate returned {status}: {}",
                body.trim()
            )));
        }

        let prediction: Prediction = res
            .json()
            .await
            .map_err(|e| InferenceError::Status(format!("prediction response: {e}")))?;
        let mapped = prediction_status(&prediction, &self.config.stem);
        debug!(prediction_id = %prediction_id, remote = %prediction.status, "replicate status checked");
        Ok(mapped)
    }

    async fn fetch_result(
        &self,
        artifact: &RemoteArtifact,
        dest: &ArtifactRef,
    ) -> Result<(), InferenceError> {
        let url = match artifact {
            RemoteArtifact::Url(url) => url,
            RemoteArtifact::Stored(source) => return Ok(self.store.copy(source, dest).await?),
        };

        let mut request = self.http.get(url);
        // Only the API host gets the token; delivery URLs are pre-signed.
        if url.starts_with(self.config.base_url.trim_end_matches('/')) {
            request = request.bearer_auth(&self.config.api_token);
        }
        let res = request
            .send()
            .await
            .map_err(|e| InferenceError::FetchInterrupted(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let msg = format!("download returned {status}");
            return Err(if retriable_status(status) {
                InferenceError::FetchInterrupted(msg)
            } else {
                InferenceError::Fetch(msg)
            });
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| InferenceError::FetchInterrupted(e.to_string()))?;
        if bytes.is_empty() {
            return Err(InferenceError::Fetch("empty download".to_string()));
        }

        self.store.put(dest, &bytes).await?;
        info!(dest = %dest, bytes = bytes.len(), "separated vocals downloaded");
        Ok(())
    }
}
