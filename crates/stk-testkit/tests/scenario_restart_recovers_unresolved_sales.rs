//! Scenario: a crash between failure and retry loses nothing.
//!
//! # Invariant under test
//!
//! The retry queue lives in memory; the audit log is the durable record.
//! After a restart, recovery rebuilds pending jobs from the newest
//! unresolved audit row per sale (original lines and the already-applied
//! set included), and the next scan heals the sale exactly as the lost
//! in-memory job would have. A second restart finds nothing to recover.

use std::sync::Arc;

use stk_audit::SyncAuditLog;
use stk_deduction::DeductionCoordinator;
use stk_retry::{
    recover_from_audit, run_due_batch, AttemptOutcome, JobStatus, RetryPolicy, RetryService,
    RECOVERY_REASON,
};
use stk_schemas::SyncStatus;
use stk_testkit::{sale_line, CafeFixture, FlakyStock, MemoryIdempotency};

#[tokio::test]
async fn recovery_rebuilds_and_heals_a_lost_partial() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("audit.jsonl");

    let cafe = CafeFixture::new();
    let flaky = FlakyStock::new(Arc::clone(&cafe.stock));
    flaky.conflict_next(cafe.milk, 1);

    let audit = Arc::new(SyncAuditLog::open(&log_path)?);
    let coordinator = Arc::new(DeductionCoordinator::new(
        cafe.catalog(),
        cafe.mappings(),
        flaky,
        Arc::clone(&cafe.stock),
        Arc::new(MemoryIdempotency::new()),
        Arc::clone(&audit),
    ));

    // The sale partially applies (beans yes, milk conflicted) and the
    // process dies before anyone enqueues the retry.
    let request = cafe.sale(vec![sale_line(cafe.latte, "Latte", 1)]);
    let report = coordinator.deduct(&request).await;
    assert!(!report.success && report.has_retryable_errors());
    assert_eq!(cafe.qty_of(cafe.beans), 482_000);
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000);

    // Restart: fresh queue, same log.
    let policy = RetryPolicy {
        base_delay_ms: 0,
        ..RetryPolicy::default()
    };
    let service = Arc::new(RetryService::new(policy));
    let reopened = Arc::new(SyncAuditLog::open(&log_path)?);

    let recovered = recover_from_audit(&service, reopened.as_ref()).await?;
    assert_eq!(recovered, 1, "the unresolved sale must come back");

    let job = service.get(request.sale_id).expect("recovered job");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0, "recovered jobs get a full budget");
    assert_eq!(job.reason, RECOVERY_REASON);
    assert_eq!(job.lines.len(), 1, "original lines ride along in the log");
    assert_eq!(
        job.applied_items,
        vec![cafe.beans],
        "the applied set survives the crash"
    );

    // Next scan heals the remainder through the reopened log.
    let executor = {
        let coordinator = Arc::clone(&coordinator);
        move |job: stk_retry::RetryJob| {
            let coordinator = Arc::clone(&coordinator);
            async move {
                let report = coordinator
                    .deduct_excluding(&job.to_request(), job.attempts + 1, &job.applied_items)
                    .await;
                AttemptOutcome::from_report(&report)
            }
        }
    };
    let ran = run_due_batch(&service, &executor).await;
    assert_eq!(ran, 1);

    let job = service.get(request.sale_id).expect("job still tracked");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(cafe.qty_of(cafe.milk), 1_750_000, "milk healed");
    assert_eq!(cafe.qty_of(cafe.beans), 482_000, "beans not deducted twice");

    // The trail ends in retry_success, so a second restart recovers nothing.
    let statuses: Vec<SyncStatus> = reopened
        .scan()?
        .into_iter()
        .map(|r| r.outcome.status)
        .collect();
    assert_eq!(statuses, vec![SyncStatus::Partial, SyncStatus::RetrySuccess]);

    let after_heal = RetryService::new(RetryPolicy::default());
    let recovered_again = recover_from_audit(&after_heal, reopened.as_ref()).await?;
    assert_eq!(recovered_again, 0, "a healed sale must stay healed");

    Ok(())
}
