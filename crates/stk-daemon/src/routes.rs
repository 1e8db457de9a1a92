//! Axum router and all HTTP handlers for stk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use stk_retry::{AttemptOutcome, JobStatus, ManualRetryError, NewRetry};
use stk_schemas::DeductionRequest;
use stk_validate::{validate_mapping, MappingUnderReview};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::info;
use uuid::Uuid;

use crate::{
    api_types::{
        DeductResponse, EnqueueRequest, EnqueueResponse, ErrorResponse, HealthResponse,
        ManualRetryResponse,
    },
    state::{publish_deduction, run_attempt, uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/deduct", post(deduct))
        .route("/v1/retry", post(enqueue_retry))
        .route("/v1/retry/stats", get(retry_stats))
        .route("/v1/retry/jobs", get(retry_jobs))
        .route("/v1/retry/:sale_id/run", post(manual_retry))
        .route("/v1/mappings/validate", post(validate_mapping_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    snap.retry = st.retry.stats();

    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// POST /v1/deduct
// ---------------------------------------------------------------------------

/// Run the deduction pipeline for one completed sale.
///
/// Always returns 200 with the full report; the POS client inspects
/// `report.success`. When the report carries retryable errors the handler
/// opens a retry job for the remainder, so conflicts heal without the
/// terminal doing anything further.
pub(crate) async fn deduct(
    State(st): State<Arc<AppState>>,
    Json(req): Json<DeductionRequest>,
) -> impl IntoResponse {
    let report = st.coordinator.deduct(&req).await;

    let mut retry_job = None;
    if report.has_retryable_errors() {
        let reason = report
            .errors
            .iter()
            .find(|e| e.retryable)
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "transient deduction failure".to_string());
        let queued = st.retry.enqueue(
            NewRetry {
                sale_id: req.sale_id,
                store_id: req.store_id,
                lines: req.lines.clone(),
                applied_items: report.applied_item_ids(),
                reason,
            },
            Utc::now(),
        );
        if queued {
            retry_job = Some(req.sale_id);
            let _ = st.bus.send(BusMsg::Retry {
                sale_id: req.sale_id,
                status: JobStatus::Pending,
                attempts: 0,
            });
        }
    }

    publish_deduction(&st.bus, &report, retry_job.is_some());
    info!(
        sale_id = %req.sale_id,
        success = report.success,
        retry_queued = retry_job.is_some(),
        "deduct"
    );
    (StatusCode::OK, Json(DeductResponse { retry_job, report }))
}

// ---------------------------------------------------------------------------
// POST /v1/retry
// ---------------------------------------------------------------------------

pub(crate) async fn enqueue_retry(
    State(st): State<Arc<AppState>>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    let sale_id = req.sale_id;
    let queued = st.retry.enqueue(
        NewRetry {
            sale_id,
            store_id: req.store_id,
            lines: req.lines,
            applied_items: req.applied_items,
            reason: req.reason,
        },
        Utc::now(),
    );

    if queued {
        let _ = st.bus.send(BusMsg::Retry {
            sale_id,
            status: JobStatus::Pending,
            attempts: 0,
        });
    }
    info!(%sale_id, queued, "retry/enqueue");
    (StatusCode::OK, Json(EnqueueResponse { sale_id, queued }))
}

// ---------------------------------------------------------------------------
// POST /v1/retry/:sale_id/run
// ---------------------------------------------------------------------------

/// Operator-triggered retry: runs the job immediately, backoff ignored.
/// 404 for unknown sales; 409 when the job is mid-flight or already done.
pub(crate) async fn manual_retry(
    State(st): State<Arc<AppState>>,
    Path(sale_id): Path<Uuid>,
) -> Response {
    let job = match st.retry.claim_manual(sale_id, Utc::now()) {
        Ok(job) => job,
        Err(e) => {
            let code = match e {
                ManualRetryError::NotFound { .. } => StatusCode::NOT_FOUND,
                ManualRetryError::InFlight { .. } | ManualRetryError::AlreadyCompleted { .. } => {
                    StatusCode::CONFLICT
                }
            };
            return (code, Json(ErrorResponse { error: e.to_string() })).into_response();
        }
    };

    let report = run_attempt(&st, &job).await;
    let outcome = AttemptOutcome::from_report(&report);
    // `claim_manual` left the job Processing, so a None here means the queue
    // dropped the sale mid-attempt; report the claimed state in that case.
    let status = st.retry.settle(sale_id, &outcome).unwrap_or(job.status);

    let _ = st.bus.send(BusMsg::Retry {
        sale_id,
        status,
        attempts: job.attempts,
    });
    info!(%sale_id, status = status.as_str(), "retry/run");

    (
        StatusCode::OK,
        Json(ManualRetryResponse {
            sale_id,
            status,
            attempts: job.attempts,
            report,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/retry/stats
// ---------------------------------------------------------------------------

pub(crate) async fn retry_stats(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.retry.stats()))
}

// ---------------------------------------------------------------------------
// GET /v1/retry/jobs
// ---------------------------------------------------------------------------

pub(crate) async fn retry_jobs(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.retry.jobs_newest_first()))
}

// ---------------------------------------------------------------------------
// POST /v1/mappings/validate
// ---------------------------------------------------------------------------

/// Run the mapping validator for an admin-supplied product payload. Pure
/// function of the request body; no daemon state is involved.
pub(crate) async fn validate_mapping_handler(
    Json(review): Json<MappingUnderReview>,
) -> impl IntoResponse {
    let report = validate_mapping(&review);
    info!(
        product = %report.product_name,
        score = report.score,
        valid = report.valid,
        "mappings/validate"
    );
    (StatusCode::OK, Json(report))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let event_name = match &m {
                BusMsg::Heartbeat { .. } => "heartbeat",
                BusMsg::Status(_) => "status",
                BusMsg::Deduction { .. } => "deduction",
                BusMsg::Retry { .. } => "retry",
                BusMsg::Log { .. } => "log",
            };
            let data = serde_json::to_string(&m).ok()?;
            Some(Ok(Event::default().event(event_name).data(data)))
        }
        Err(_) => None, // lagged / closed
    })
}
