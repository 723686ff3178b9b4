//! Acquisition jobs: enqueue, poll, purge, and the live status stream.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use facturo_infra::jobs::{Job, JobId, JobKind, JobQueue, RetryPolicy};
use facturo_sunat::{AcquisitionRequest, PortalCredentials};

use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue_acquisition).delete(purge_queue))
        .route("/stream", get(stream_status))
        .route("/stats", get(queue_stats))
        .route("/:job_id", get(get_job_status))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub account_tax_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueAcquisitionRequest {
    pub issuer_tax_id: String,
    pub series: String,
    pub number: String,
    pub credentials: CredentialsRequest,
    /// Total attempts allowed; defaults to the queue policy.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Base backoff delay in milliseconds (exponential: doubles per attempt).
    #[serde(default)]
    pub backoff_base_ms: Option<u64>,
}

/// POST /acquisitions
///
/// Always returns the job id synchronously; the outcome is only available via
/// polling or the status stream.
pub async fn enqueue_acquisition(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<EnqueueAcquisitionRequest>,
) -> axum::response::Response {
    if body.issuer_tax_id.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "issuer_tax_id must not be empty",
        );
    }
    if body.series.trim().is_empty() || body.number.trim().is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "series and number must not be empty",
        );
    }

    let request = AcquisitionRequest {
        issuer_tax_id: body.issuer_tax_id,
        series: body.series,
        number: body.number,
        credentials: PortalCredentials {
            account_tax_id: body.credentials.account_tax_id,
            username: body.credentials.username,
            password: body.credentials.password,
        },
    };

    let payload = match serde_json::to_value(&request) {
        Ok(payload) => payload,
        Err(e) => {
            return errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "serialize_error",
                e.to_string(),
            );
        }
    };

    let mut policy = RetryPolicy::default();
    if let Some(max_attempts) = body.max_attempts {
        policy.max_attempts = max_attempts.max(1);
    }
    if let Some(base_ms) = body.backoff_base_ms {
        policy.backoff.base_delay = Duration::from_millis(base_ms);
    }

    let job = Job::new(JobKind::DocumentAcquisition, payload).with_retry_policy(policy);
    match services.queue.enqueue(job) {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "job_id": job_id.to_string() })),
        )
            .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// GET /acquisitions/:job_id: the job status registry.
pub async fn get_job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match job_id.parse::<Uuid>() {
        Ok(uuid) => JobId::from_uuid(uuid),
        Err(_) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id");
        }
    };

    match services.queue.status(job_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// DELETE /acquisitions: administrative drain-and-wipe. In-flight workers are
/// not interrupted; their late settlements land on nothing.
pub async fn purge_queue(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.queue.purge() {
        Ok(purged) => (
            StatusCode::OK,
            Json(serde_json::json!({ "purged": purged })),
        )
            .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// GET /acquisitions/stats
pub async fn queue_stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.queue.stats() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// GET /acquisitions/stream
///
/// Server-sent stream of job status events. Strictly live: whatever fired
/// before the connection is gone.
pub async fn stream_status(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, std::convert::Infallible>>();

    // Bridge the blocking bus subscription into the async response stream.
    let notifier = services.notifier.clone();
    tokio::task::spawn_blocking(move || {
        let subscription = notifier.subscribe();
        let mut last_heartbeat = std::time::Instant::now();

        loop {
            match subscription.recv_timeout(Duration::from_millis(1000)) {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(_) => continue,
                    };
                    if tx
                        .send(Ok(SseEvent::default().event("job_status").data(json)))
                        .is_err()
                    {
                        break; // Receiver dropped.
                    }
                    last_heartbeat = std::time::Instant::now();
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if last_heartbeat.elapsed() > Duration::from_secs(15) {
                        if tx
                            .send(Ok(SseEvent::default().event("heartbeat").data("{}")))
                            .is_err()
                        {
                            break;
                        }
                        last_heartbeat = std::time::Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}
