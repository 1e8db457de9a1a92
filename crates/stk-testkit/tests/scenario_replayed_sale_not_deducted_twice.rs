//! Scenario: a replayed sale is not deducted twice.
//!
//! # Invariant under test
//!
//! `deduct` is idempotent per sale id. However many times the caller sends
//! the same sale (POS retry on timeout, double-tap, queue redelivery), the
//! stock moves once, the movement journal grows once, and every replay
//! reports the duplicate instead of touching anything.

use std::sync::Arc;

use stk_deduction::DeductionCoordinator;
use stk_schemas::SyncStatus;
use stk_testkit::{sale_line, wait_for_movements, CafeFixture, MemoryIdempotency, RecordingAudit};

#[tokio::test]
async fn second_and_third_delivery_are_noops() {
    let cafe = CafeFixture::new();
    let audit = Arc::new(RecordingAudit::new());
    let coordinator = DeductionCoordinator::new(
        cafe.catalog(),
        cafe.mappings(),
        Arc::clone(&cafe.stock),
        Arc::clone(&cafe.stock),
        Arc::new(MemoryIdempotency::new()),
        Arc::clone(&audit),
    );

    let request = cafe.sale(vec![
        sale_line(cafe.latte, "Latte", 1),
        sale_line(cafe.croffle, "Croffle", 2),
    ]);

    // First delivery: milk 250, beans 18, mix 160 come off the shelf.
    let first = coordinator.deduct(&request).await;
    assert!(first.success, "errors: {:?}", first.errors);
    assert!(!first.duplicate);
    assert_eq!(first.deducted.len(), 3);

    let milk_after = cafe.qty_of(cafe.milk);
    let beans_after = cafe.qty_of(cafe.beans);
    let mix_after = cafe.qty_of(cafe.croffle_mix);
    assert_eq!(milk_after, 2_000_000 - 250_000);
    assert_eq!(beans_after, 500_000 - 18_000);
    assert_eq!(mix_after, 400_000 - 160_000);

    wait_for_movements(&cafe.stock, 3).await;

    // Replays: reported as duplicates, zero further mutation anywhere.
    for _ in 0..2 {
        let replay = coordinator.deduct(&request).await;
        assert!(replay.success);
        assert!(replay.duplicate, "replay must be flagged as duplicate");
        assert!(replay.deducted.is_empty());
    }

    assert_eq!(cafe.qty_of(cafe.milk), milk_after);
    assert_eq!(cafe.qty_of(cafe.beans), beans_after);
    assert_eq!(cafe.qty_of(cafe.croffle_mix), mix_after);
    assert_eq!(cafe.stock.movement_count(), 3, "journal must not grow on replay");

    // Only the real attempt reaches the audit log.
    assert_eq!(audit.statuses(), vec![SyncStatus::Success]);
}

#[tokio::test]
async fn distinct_sales_of_identical_content_both_deduct() {
    let cafe = CafeFixture::new();
    let coordinator = DeductionCoordinator::new(
        cafe.catalog(),
        cafe.mappings(),
        Arc::clone(&cafe.stock),
        Arc::clone(&cafe.stock),
        Arc::new(MemoryIdempotency::new()),
        Arc::new(RecordingAudit::new()),
    );

    // Two genuinely different sales that happen to order the same thing.
    let first = cafe.sale(vec![sale_line(cafe.croffle, "Croffle", 1)]);
    let second = cafe.sale(vec![sale_line(cafe.croffle, "Croffle", 1)]);

    assert!(coordinator.deduct(&first).await.success);
    assert!(coordinator.deduct(&second).await.success);

    assert_eq!(
        cafe.qty_of(cafe.croffle_mix),
        400_000 - 2 * 80_000,
        "idempotence is keyed on sale id, not sale content"
    );
}
