//! ReplicateClient against a local stand-in for the Replicate HTTP API.

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Value, json};

use demusify_core::{ArtifactRef, InferenceHandle, JobId};
use demusify_infra::artifacts::{ArtifactStore, LocalArtifactStore};
use demusify_infra::inference::{
    InferenceClient, InferenceError, InferenceStatus, RemoteArtifact, RemoteFailure,
    ReplicateClient, ReplicateConfig,
};

const TOKEN: &str = "r8_test_token";

#[derive(Default)]
struct Seen {
    uploads: usize,
    prediction_inputs: Vec<Value>,
    delivery_had_auth: Option<bool>,
}

#[derive(Clone)]
struct FakeReplicate {
    origin: String,
    seen: Arc<Mutex<Seen>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn upload(State(fake): State<FakeReplicate>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, axum::Json(json!({"detail": "unauthenticated"})));
    }
    let multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));
    assert!(multipart);
    assert!(!body.is_empty());
    fake.seen.lock().unwrap().uploads += 1;
    (
        StatusCode::CREATED,
        axum::Json(json!({"id": "file1", "urls": {"get": format!("{}/v1/files/file1", fake.origin)}})),
    )
}

async fn create_prediction(
    State(fake): State<FakeReplicate>,
    Path((owner, name)): Path<(String, String)>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> impl IntoResponse {
    assert!(authorized(&headers));
    assert_eq!((owner.as_str(), name.as_str()), ("acme", "demucs"));
    fake.seen.lock().unwrap().prediction_inputs.push(body["input"].clone());
    (StatusCode::CREATED, axum::Json(json!({"id": "pred-1", "status": "starting"})))
}

async fn prediction(State(fake): State<FakeReplicate>, Path(id): Path<String>) -> impl IntoResponse {
    match id.as_str() {
        "pred-1" => (
            StatusCode::OK,
            axum::Json(json!({
                "id": "pred-1",
                "status": "succeeded",
                "output": {"vocals": format!("{}/delivery/vocals.mp3", fake.origin), "other": "x"}
            })),
        ),
        "busy" => (StatusCode::OK, axum::Json(json!({"id": "busy", "status": "processing"}))),
        "broken" => (
            StatusCode::OK,
            axum::Json(json!({"id": "broken", "status": "failed", "error": "out of memory"})),
        ),
        _ => (StatusCode::NOT_FOUND, axum::Json(json!({"detail": "Not found."}))),
    }
}

async fn delivery(State(fake): State<FakeReplicate>, headers: HeaderMap) -> impl IntoResponse {
    fake.seen.lock().unwrap().delivery_had_auth = Some(headers.contains_key(header::AUTHORIZATION));
    b"ID3 vocals".to_vec()
}

async fn delivery_unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "try later")
}

async fn delivery_gone() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "no such file")
}

struct Harness {
    origin: String,
    client: ReplicateClient,
    store: Arc<LocalArtifactStore>,
    seen: Arc<Mutex<Seen>>,
    handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn(token: &str) -> Harness {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let seen = Arc::new(Mutex::new(Seen::default()));
    let fake = FakeReplicate {
        origin: origin.clone(),
        seen: seen.clone(),
    };

    let app = Router::new()
        .route("/v1/files", post(upload))
        .route("/v1/models/:owner/:name/predictions", post(create_prediction))
        .route("/v1/predictions/:id", get(prediction))
        .route("/delivery/vocals.mp3", get(delivery))
        .route("/delivery/busy.mp3", get(delivery_unavailable))
        .route("/delivery/gone.mp3", get(delivery_gone))
        .with_state(fake);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalArtifactStore::open(dir.path()).await.unwrap());
    let client = ReplicateClient::new(
        reqwest::Client::new(),
        store.clone(),
        ReplicateConfig {
            base_url: format!("{origin}/v1"),
            api_token: token.to_string(),
            model: "acme/demucs".to_string(),
            stem: "vocals".to_string(),
        },
    )
    .unwrap();

    Harness {
        origin,
        client,
        store,
        seen,
        handle,
        _dir: dir,
    }
}

#[tokio::test]
async fn submit_poll_and_fetch() {
    let h = spawn(TOKEN).await;
    let job = JobId::new();
    let audio = ArtifactRef::upload(job, "mp4").derive(ArtifactRef::WORKING_DIR, "audio.mp3");
    h.store.put(&audio, b"ID3 mixed").await.unwrap();

    let handle = h.client.submit(&audio).await.unwrap();
    assert_eq!(handle, InferenceHandle::replicate("pred-1"));
    {
        let seen = h.seen.lock().unwrap();
        assert_eq!(seen.uploads, 1);
        assert_eq!(seen.prediction_inputs[0]["stem"], "vocals");
        assert!(seen.prediction_inputs[0]["audio"].as_str().unwrap().ends_with("/v1/files/file1"));
    }

    let status = h.client.check_status(&handle).await.unwrap();
    let InferenceStatus::Completed(artifact) = status.clone() else {
        panic!("expected completion, got {status:?}");
    };
    assert!(matches!(&artifact, RemoteArtifact::Url(url) if url.ends_with("/delivery/vocals.mp3")));

    let dest = audio.derive(ArtifactRef::WORKING_DIR, "vocals.mp3");
    h.client.fetch_result(&artifact, &dest).await.unwrap();
    assert_eq!(h.store.get(&dest).await.unwrap(), b"ID3 vocals");
    assert_eq!(h.seen.lock().unwrap().delivery_had_auth, Some(false));
}

#[tokio::test]
async fn running_failed_and_unknown_predictions() {
    let h = spawn(TOKEN).await;

    let running = h.client.check_status(&InferenceHandle::replicate("busy")).await.unwrap();
    assert_eq!(
        running,
        InferenceStatus::Running {
            remote_status: "processing".to_string()
        }
    );

    let failed = h.client.check_status(&InferenceHandle::replicate("broken")).await.unwrap();
    assert_eq!(
        failed,
        InferenceStatus::Failed(RemoteFailure::Remote("out of memory".to_string()))
    );

    let expired = h.client.check_status(&InferenceHandle::replicate("nope")).await.unwrap();
    assert!(matches!(expired, InferenceStatus::Failed(RemoteFailure::Expired(_))));
}

#[tokio::test]
async fn download_errors_separate_interruptions_from_missing_output() {
    let h = spawn(TOKEN).await;
    let dest = ArtifactRef::new("working/x_vocals.mp3").unwrap();

    let busy = RemoteArtifact::Url(format!("{}/delivery/busy.mp3", h.origin));
    let err = h.client.fetch_result(&busy, &dest).await.unwrap_err();
    assert!(matches!(err, InferenceError::FetchInterrupted(_)), "{err}");
    assert!(err.is_transient());

    let gone = RemoteArtifact::Url(format!("{}/delivery/gone.mp3", h.origin));
    let err = h.client.fetch_result(&gone, &dest).await.unwrap_err();
    assert!(matches!(err, InferenceError::Fetch(_)), "{err}");
    assert!(!err.is_transient());

    assert!(!h.store.exists(&dest).await.unwrap());
}

#[tokio::test]
async fn bad_credentials_are_a_retriable_submission_failure() {
    let h = spawn("wrong").await;
    let audio = ArtifactRef::new("working/x_audio.mp3").unwrap();
    h.store.put(&audio, b"ID3").await.unwrap();

    let err = h.client.submit(&audio).await.unwrap_err();
    assert!(matches!(err, InferenceError::SubmissionFailed(_)));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn unreachable_service_fails_submission() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalArtifactStore::open(dir.path()).await.unwrap());
    let audio = ArtifactRef::new("working/x_audio.mp3").unwrap();
    store.put(&audio, b"ID3").await.unwrap();

    // Port 9 (discard) on localhost is closed in test environments.
    let client = ReplicateClient::new(
        reqwest::Client::new(),
        store,
        ReplicateConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_token: TOKEN.to_string(),
            model: "acme/demucs".to_string(),
            stem: "vocals".to_string(),
        },
    )
    .unwrap();

    let err = client.submit(&audio).await.unwrap_err();
    assert!(err.is_retriable(), "{err}");
}
