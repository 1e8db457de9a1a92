//! Scenario: a conflicted partial deduction is healed by the retry queue.
//!
//! # Invariant under test
//!
//! When a sale applies some items and conflicts on others, the retryable
//! remainder goes to the queue carrying the applied set. The retry deducts
//! only the remainder (items that applied on attempt one are excluded, so
//! healing a partial can never double-deduct), and the audit trail reads
//! partial, then retry_success.

use std::sync::Arc;

use stk_deduction::DeductionCoordinator;
use stk_retry::{run_due_batch, AttemptOutcome, JobStatus, NewRetry, RetryPolicy, RetryService};
use stk_schemas::SyncStatus;
use stk_testkit::{sale_line, CafeFixture, FlakyStock, MemoryIdempotency, RecordingAudit};

#[tokio::test]
async fn queued_retry_deducts_only_the_remainder() {
    let cafe = CafeFixture::new();
    let flaky = FlakyStock::new(Arc::clone(&cafe.stock));
    flaky.conflict_next(cafe.milk, 1);

    let audit = Arc::new(RecordingAudit::new());
    let coordinator = Arc::new(DeductionCoordinator::new(
        cafe.catalog(),
        cafe.mappings(),
        flaky,
        Arc::clone(&cafe.stock),
        Arc::new(MemoryIdempotency::new()),
        Arc::clone(&audit),
    ));

    let request = cafe.sale(vec![sale_line(cafe.latte, "Latte", 1)]);

    // Attempt one: beans apply, milk conflicts.
    let report = coordinator.deduct(&request).await;
    assert!(!report.success);
    assert!(report.has_retryable_errors());
    assert_eq!(report.deducted.len(), 1);
    assert_eq!(report.deducted[0].item_id, cafe.beans);
    assert_eq!(cafe.qty_of(cafe.beans), 500_000 - 18_000);
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000, "conflicted item untouched");

    // Hand the remainder to the queue, exactly as the service layer does.
    let policy = RetryPolicy {
        base_delay_ms: 0,
        ..RetryPolicy::default()
    };
    let service = Arc::new(RetryService::new(policy));
    let enqueued = service.enqueue(
        NewRetry {
            sale_id: request.sale_id,
            store_id: request.store_id,
            lines: request.lines.clone(),
            applied_items: report.applied_item_ids(),
            reason: report.errors[0].message.clone(),
        },
        chrono::Utc::now(),
    );
    assert!(enqueued);

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
    assert_eq!(ran, 1, "the due job must execute");

    let job = service.get(request.sale_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);

    // The retry applied milk and left beans alone.
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000 - 250_000);
    assert_eq!(
        cafe.qty_of(cafe.beans),
        500_000 - 18_000,
        "items applied on attempt one must not deduct again"
    );

    assert_eq!(
        audit.statuses(),
        vec![SyncStatus::Partial, SyncStatus::RetrySuccess],
        "the trail tells the whole story"
    );
}

#[tokio::test]
async fn terminal_failures_do_not_burn_the_whole_budget() {
    let cafe = CafeFixture::new();
    let coordinator = Arc::new(DeductionCoordinator::new(
        cafe.catalog(),
        // No mappings registered at all: every line is incomplete, terminally.
        stk_testkit::FixedMappings::new(Vec::new()),
        Arc::clone(&cafe.stock),
        Arc::clone(&cafe.stock),
        Arc::new(MemoryIdempotency::new()),
        Arc::new(RecordingAudit::new()),
    ));

    let request = cafe.sale(vec![sale_line(cafe.latte, "Latte", 1)]);
    let policy = RetryPolicy {
        base_delay_ms: 0,
        ..RetryPolicy::default()
    };
    let service = Arc::new(RetryService::new(policy));
    service.enqueue(
        NewRetry {
            sale_id: request.sale_id,
            store_id: request.store_id,
            lines: request.lines.clone(),
            applied_items: Vec::new(),
            reason: "sync failed at the counter".into(),
        },
        chrono::Utc::now(),
    );

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

    run_due_batch(&service, &executor).await;

    let job = service.get(request.sale_id).expect("job exists");
    assert_eq!(job.status, JobStatus::Failed, "missing mappings are not transient");
    assert_eq!(job.attempts, 1, "terminal outcomes spend one attempt, not five");
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000);
}
