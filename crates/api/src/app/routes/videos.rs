//! Video submission, status polling, download and removal.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Extension, Path, Query},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tokio_util::io::ReaderStream;

use demusify_core::{JobId, JobState};

use crate::app::dto::{self, ListQuery, SubmitQuery, SubmitResponse, VideoStatusResponse};
use crate::app::errors;
use crate::app::services::AppServices;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_videos).post(submit_video))
        .route("/:id", get(video_status).delete(delete_video))
        .route("/:id/download", get(download_video))
        .route("/:id/stream", get(stream_video))
}

/// Unknown and malformed ids are both "no such video".
fn parse_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no video with id {raw}"),
        )
    })
}

/// POST /videos?filename=clip.mp4
///
/// Body is the raw video. Answers once the job is waiting on inference.
pub async fn submit_video(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<SubmitQuery>,
    body: Bytes,
) -> axum::response::Response {
    match services
        .orchestrator
        .submit(&body, query.filename.as_deref())
        .await
    {
        Ok(job) => (
            StatusCode::ACCEPTED,
            [(header::LOCATION, dto::video_location(&job))],
            Json(SubmitResponse {
                id: job.id.to_string(),
                state: job.state,
            }),
        )
            .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// GET /videos/:id
///
/// Each call is one poll: it may advance the job.
pub async fn video_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orchestrator.poll(id).await {
        Ok(job) => Json(VideoStatusResponse::from(&job)).into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// How the result is handed to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Save-as download.
    Attachment,
    /// In-browser playback.
    Inline,
}

/// GET /videos/:id/download
pub async fn download_video(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    serve_result(&services, &id, Delivery::Attachment).await
}

/// GET /videos/:id/stream
pub async fn stream_video(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    serve_result(&services, &id, Delivery::Inline).await
}

/// Stream the final video of a ready job straight from storage.
async fn serve_result(
    services: &AppServices,
    raw_id: &str,
    delivery: Delivery,
) -> axum::response::Response {
    let id = match parse_id(raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let job = match services.orchestrator.get(id).await {
        Ok(job) => job,
        Err(e) => return errors::orchestrator_error_to_response(e),
    };
    let Some(result) = job.result_ref.as_ref().filter(|_| job.state == JobState::Ready) else {
        return errors::json_error(
            StatusCode::NOT_FOUND,
            "not_ready",
            format!("video {id} is {}", job.state),
        );
    };

    let artifact = match services.orchestrator.artifacts().reader(result).await {
        Ok(artifact) => artifact,
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "result artifact unreadable");
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                e.to_string(),
            );
        }
    };

    let stem = job
        .original_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.').map(|(stem, _)| stem))
        .filter(|stem| !stem.is_empty())
        .unwrap_or(job.source_ref.stem());
    let disposition = match delivery {
        Delivery::Attachment => "attachment",
        Delivery::Inline => "inline",
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("{disposition}; filename=\"{stem}_nomusic.mp4\""))
            .unwrap_or_else(|_| HeaderValue::from_static(disposition)),
    );
    if delivery == Delivery::Inline {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }

    let body = Body::from_stream(ReaderStream::new(artifact.reader));
    (StatusCode::OK, headers, body).into_response()
}

/// DELETE /videos/:id
///
/// Removes a finished job and its files. Jobs still in flight answer 409.
pub async fn delete_video(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.orchestrator.delete(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}

/// GET /videos?limit=N
///
/// Stored state only; listing never polls the provider.
pub async fn list_videos(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    match services.orchestrator.list(limit).await {
        Ok(jobs) => Json(
            jobs.iter()
                .map(VideoStatusResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::orchestrator_error_to_response(e),
    }
}
