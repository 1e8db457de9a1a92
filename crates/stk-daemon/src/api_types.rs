//! Request and response types for all stk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here; the
//! validator endpoint reuses `stk-validate`'s own payload types directly.

use serde::{Deserialize, Serialize};
use stk_retry::JobStatus;
use stk_schemas::{DeductionReport, SaleLine};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// /v1/deduct
// ---------------------------------------------------------------------------

/// Response for a deduction request: the full report, plus the retry job
/// opened for the remainder when the report carried retryable errors.
/// Retry jobs are keyed by sale id, so `retry_job` echoes the sale id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductResponse {
    pub retry_job: Option<Uuid>,
    pub report: DeductionReport,
}

// ---------------------------------------------------------------------------
// /v1/retry
// ---------------------------------------------------------------------------

/// Explicit enqueue of a retry job for a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub lines: Vec<SaleLine>,
    /// Item ids already deducted; retries exclude them.
    #[serde(default)]
    pub applied_items: Vec<Uuid>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub sale_id: Uuid,
    /// False when an active job for the sale already exists.
    pub queued: bool,
}

// ---------------------------------------------------------------------------
// /v1/retry/:sale_id/run
// ---------------------------------------------------------------------------

/// Outcome of an operator-triggered retry run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualRetryResponse {
    pub sale_id: Uuid,
    pub status: JobStatus,
    pub attempts: u32,
    pub report: DeductionReport,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body for 4xx refusals (unknown job, job already running, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
