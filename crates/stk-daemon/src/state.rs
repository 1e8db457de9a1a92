//! Shared runtime state for stk-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself
//! apart from the spawn helpers at the bottom.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stk_audit::SyncAuditSink;
use stk_deduction::{CatalogStore, DeductionCoordinator, IdempotencyStore, MappingStore};
use stk_ledger::{MovementSink, StockStore};
use stk_retry::{AttemptOutcome, JobStatus, RetryJob, RetryService, RetryStats};
use stk_schemas::DeductionReport;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// The coordinator as the daemon wires it: every collaborator behind a
/// trait object so memory and Postgres backends share one handler set.
pub type Coordinator = DeductionCoordinator<
    Arc<dyn CatalogStore>,
    Arc<dyn MappingStore>,
    Arc<dyn StockStore>,
    Arc<dyn MovementSink>,
    Arc<dyn IdempotencyStore>,
    Arc<dyn SyncAuditSink>,
>;

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
/// UI layers subscribe here; they never call into the coordinator directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat {
        ts_millis: i64,
    },
    Status(StatusSnapshot),
    /// One deduction attempt finished (first call or retry).
    Deduction {
        sale_id: Uuid,
        success: bool,
        duplicate: bool,
        items_deducted: usize,
        retry_queued: bool,
    },
    /// A retry job changed state (enqueued or settled).
    Retry {
        sale_id: Uuid,
        status: JobStatus,
        attempts: u32,
    },
    Log {
        level: String,
        msg: String,
    },
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health / status responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// StatusSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of daemon state, returned by GET /v1/status and
/// carried inside SSE `status` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub daemon_uptime_secs: u64,
    /// "memory" | "postgres"
    pub storage: String,
    /// Hash of the canonical configuration the daemon booted with.
    pub config_hash: String,
    /// Retry jobs reopened from the audit log at boot.
    pub recovered_jobs: usize,
    pub retry: RetryStats,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Static build metadata.
    pub build: BuildInfo,
    /// The deduction pipeline behind its trait-object collaborators.
    pub coordinator: Arc<Coordinator>,
    /// The in-memory retry queue (durable state lives in the audit log).
    pub retry: Arc<RetryService>,
    /// Mutable status state; uptime and retry counters are refreshed on read.
    pub status: Arc<RwLock<StatusSnapshot>>,
}

impl AppState {
    pub fn new(
        coordinator: Coordinator,
        retry: Arc<RetryService>,
        storage: &str,
        config_hash: String,
        recovered_jobs: usize,
    ) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);

        let initial_status = StatusSnapshot {
            daemon_uptime_secs: uptime_secs(),
            storage: storage.to_string(),
            config_hash,
            recovered_jobs,
            retry: retry.stats(),
        };

        Self {
            bus,
            build: BuildInfo {
                service: "stk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            coordinator: Arc::new(coordinator),
            retry,
            status: Arc::new(RwLock::new(initial_status)),
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt execution
// ---------------------------------------------------------------------------

/// Run one deduction attempt for a retry job and publish the result on the
/// bus. The coordinator counts the original POS call as attempt 1, so a
/// job's retry count is always one behind the attempt number it runs.
pub async fn run_attempt(state: &AppState, job: &RetryJob) -> DeductionReport {
    let report = state
        .coordinator
        .deduct_excluding(&job.to_request(), job.attempts + 1, &job.applied_items)
        .await;
    publish_deduction(&state.bus, &report, false);
    report
}

/// The executor closure handed to the retry worker.
pub fn retry_executor(
    state: Arc<AppState>,
) -> impl Fn(RetryJob) -> Pin<Box<dyn Future<Output = AttemptOutcome> + Send>> + Send + Sync + 'static
{
    move |job: RetryJob| {
        let state = Arc::clone(&state);
        Box::pin(async move {
            let report = run_attempt(&state, &job).await;
            AttemptOutcome::from_report(&report)
        })
    }
}

/// Broadcast a finished deduction attempt. Send errors mean nobody is
/// listening, which is fine.
pub fn publish_deduction(bus: &broadcast::Sender<BusMsg>, report: &DeductionReport, retry_queued: bool) {
    let _ = bus.send(BusMsg::Deduction {
        sale_id: report.sale_id,
        success: report.success,
        duplicate: report.duplicate,
        items_deducted: report.deducted.len(),
        retry_queued,
    });
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that refreshes the status snapshot every
/// `interval` and broadcasts it, so stream subscribers see retry-queue
/// movement without polling GET /v1/status.
pub fn spawn_status_refresh(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snap = {
                let mut s = state.status.write().await;
                s.daemon_uptime_secs = uptime_secs();
                s.retry = state.retry.stats();
                s.clone()
            };
            let _ = state.bus.send(BusMsg::Status(snap));
        }
    });
}
