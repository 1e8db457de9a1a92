//! The scan loop and startup recovery.
//!
//! The worker owns no deduction logic: it claims due jobs and hands each to
//! an executor future supplied by the caller (the daemon wires this to the
//! coordinator), then folds the outcomes back into the queue. Batches join
//! before the next scan so one slow attempt cannot pile up claims.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

use stk_audit::{SyncAuditSink, RECOVERY_LIMIT, RECOVERY_WINDOW_HOURS};

use crate::job::{AttemptOutcome, RetryJob};
use crate::service::{NewRetry, RetryService};

/// Note attached to jobs rebuilt from the audit log.
pub const RECOVERY_REASON: &str = "recovered from audit log";

/// Spawn the scan loop: every `policy.scan_interval`, claim due jobs (at
/// most `policy.concurrency`) and run them through `execute`.
pub fn spawn_retry_worker<F, Fut>(service: Arc<RetryService>, execute: F) -> JoinHandle<()>
where
    F: Fn(RetryJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AttemptOutcome> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(service.policy().scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_due_batch(&service, &execute).await;
        }
    })
}

/// One scan: claim and execute every due job, then settle the batch.
/// Returns how many jobs ran. Public so tests and manual triggers can
/// drive scans without the timer.
pub async fn run_due_batch<F, Fut>(service: &RetryService, execute: &F) -> usize
where
    F: Fn(RetryJob) -> Fut + Send + Sync,
    Fut: Future<Output = AttemptOutcome> + Send + 'static,
{
    let claimed = service.claim_due(Utc::now());
    let count = claimed.len();
    if count > 0 {
        tracing::debug!(count, "retry scan claimed jobs");
    }

    let mut running = Vec::with_capacity(count);
    for job in claimed {
        let sale_id = job.sale_id;
        running.push((sale_id, tokio::spawn(execute(job))));
    }
    for (sale_id, handle) in running {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => AttemptOutcome::Retry {
                detail: format!("retry task aborted: {e}"),
                applied_items: Vec::new(),
            },
        };
        match service.settle(sale_id, &outcome) {
            Some(status) => {
                tracing::info!(%sale_id, status = status.as_str(), "retry attempt settled");
            }
            None => {
                tracing::warn!(%sale_id, "settled an attempt the queue no longer tracks");
            }
        }
    }
    count
}

/// Rebuild the queue from the audit log after a restart: the latest record
/// per sale inside the recovery window, unresolved only, newest first,
/// capped. Recovered jobs start with a zero attempt count so they are due
/// immediately and get a full budget. Returns how many jobs were opened.
pub async fn recover_from_audit(
    service: &RetryService,
    sink: &dyn SyncAuditSink,
) -> anyhow::Result<usize> {
    let now = Utc::now();
    let unresolved = sink
        .recent_unresolved(now, RECOVERY_WINDOW_HOURS, RECOVERY_LIMIT)
        .await?;

    let mut opened = 0;
    for outcome in unresolved {
        if outcome.lines.is_empty() {
            tracing::warn!(sale_id = %outcome.sale_id, "unresolved record carries no lines; skipping");
            continue;
        }
        let queued = service.enqueue(
            NewRetry {
                sale_id: outcome.sale_id,
                store_id: outcome.store_id,
                lines: outcome.lines,
                applied_items: outcome.applied_items,
                reason: RECOVERY_REASON.to_string(),
            },
            now,
        );
        if queued {
            opened += 1;
        }
    }
    tracing::info!(count = opened, "retry queue recovered from audit log");
    Ok(opened)
}
