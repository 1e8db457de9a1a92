//! Scenario: the POST /v1/deduct surface, from clean sales to conflicted
//! ones that heal through the retry endpoints.
//!
//! # Invariant under test
//!
//! The HTTP layer preserves the coordinator's guarantees: duplicates stay
//! no-ops, insufficiency mutates nothing and opens no retry job, and a CAS
//! conflict auto-enqueues a job that an operator can run to completion
//! without double-deducting the items that already applied.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use stk_audit::SyncAuditSink;
use stk_daemon::{
    routes,
    state::{AppState, Coordinator},
};
use stk_deduction::{CatalogStore, IdempotencyStore, MappingStore};
use stk_ledger::{MovementSink, StockStore};
use stk_retry::{RetryPolicy, RetryService};
use stk_testkit::{sale_line, CafeFixture, FlakyStock, MemoryIdempotency, RecordingAudit};
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// AppState over the cafe fixture; `stock` is the store the coordinator
/// writes through, which the conflict test swaps for a flaky wrapper.
fn make_state(cafe: &CafeFixture, stock: Arc<dyn StockStore>) -> Arc<AppState> {
    let coordinator = Coordinator::new(
        Arc::new(cafe.catalog()) as Arc<dyn CatalogStore>,
        Arc::new(cafe.mappings()) as Arc<dyn MappingStore>,
        stock,
        Arc::clone(&cafe.stock) as Arc<dyn MovementSink>,
        Arc::new(MemoryIdempotency::new()) as Arc<dyn IdempotencyStore>,
        Arc::new(RecordingAudit::new()) as Arc<dyn SyncAuditSink>,
    );
    let retry = Arc::new(RetryService::new(RetryPolicy {
        base_delay_ms: 0,
        ..RetryPolicy::default()
    }));
    Arc::new(AppState::new(
        coordinator,
        retry,
        "memory",
        "cfg-test".to_string(),
        0,
    ))
}

fn get(uri: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

fn post_json<T: serde::Serialize>(uri: &str, body: &T) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

// ---------------------------------------------------------------------------
// Clean sale
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deduct_applies_the_recipe_and_reports_success() {
    let cafe = CafeFixture::new();
    let st = make_state(&cafe, Arc::clone(&cafe.stock) as Arc<dyn StockStore>);

    let sale = cafe.sale(vec![sale_line(cafe.latte, "Latte", 2)]);
    let (status, body) = call(routes::build_router(st), post_json("/v1/deduct", &sale)).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["report"]["success"], true, "got {json}");
    assert!(json["retry_job"].is_null());
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000 - 500_000);
    assert_eq!(cafe.qty_of(cafe.beans), 500_000 - 36_000);
}

// ---------------------------------------------------------------------------
// Duplicate sale
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replayed_sale_is_a_success_noop() {
    let cafe = CafeFixture::new();
    let st = make_state(&cafe, Arc::clone(&cafe.stock) as Arc<dyn StockStore>);

    let sale = cafe.sale(vec![sale_line(cafe.americano, "Americano", 1)]);
    let (_, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/deduct", &sale),
    )
    .await;
    assert_eq!(parse_json(body)["report"]["duplicate"], false);
    let after_first = cafe.qty_of(cafe.beans);

    let (status, body) = call(routes::build_router(st), post_json("/v1/deduct", &sale)).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["report"]["success"], true);
    assert_eq!(json["report"]["duplicate"], true, "got {json}");
    assert_eq!(cafe.qty_of(cafe.beans), after_first, "no second deduction");
}

// ---------------------------------------------------------------------------
// Insufficient stock
// ---------------------------------------------------------------------------

#[tokio::test]
async fn insufficient_stock_mutates_nothing_and_opens_no_job() {
    let cafe = CafeFixture::new();
    let st = make_state(&cafe, Arc::clone(&cafe.stock) as Arc<dyn StockStore>);
    let before = cafe.total_stock_milli();

    // Six croffles need 480g of mix; the store holds 400g.
    let sale = cafe.sale(vec![sale_line(cafe.croffle, "Croffle", 6)]);
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/deduct", &sale),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["report"]["success"], false);
    assert!(
        json["retry_job"].is_null(),
        "insufficiency is terminal, not retryable: {json}"
    );
    assert_eq!(cafe.total_stock_milli(), before, "zero mutations");

    let (_, body) = call(routes::build_router(st), get("/v1/retry/stats")).await;
    assert_eq!(parse_json(body)["total_jobs"], 0);
}

// ---------------------------------------------------------------------------
// Conflict -> auto-enqueue -> manual run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn conflicted_sale_auto_enqueues_and_manual_run_heals_it() {
    let cafe = CafeFixture::new();
    let flaky = Arc::new(FlakyStock::new(Arc::clone(&cafe.stock)));
    flaky.conflict_next(cafe.milk, 1);
    let st = make_state(&cafe, Arc::clone(&flaky) as Arc<dyn StockStore>);

    // One latte: beans apply, milk conflicts, the handler opens a job.
    let sale = cafe.sale(vec![sale_line(cafe.latte, "Latte", 1)]);
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        post_json("/v1/deduct", &sale),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["report"]["success"], false);
    assert_eq!(json["retry_job"], sale.sale_id.to_string(), "got {json}");
    assert_eq!(cafe.qty_of(cafe.beans), 500_000 - 18_000);
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000, "conflicted item untouched");

    let (_, body) = call(routes::build_router(Arc::clone(&st)), get("/v1/retry/stats")).await;
    assert_eq!(parse_json(body)["pending_jobs"], 1);

    // Operator runs the job now; the conflict budget is spent, so it lands.
    let (status, body) = call(
        routes::build_router(Arc::clone(&st)),
        Request::builder()
            .method("POST")
            .uri(format!("/v1/retry/{}/run", sale.sale_id))
            .body(axum::body::Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["status"], "completed", "got {json}");
    assert_eq!(json["attempts"], 1);
    assert_eq!(json["report"]["success"], true);
    assert_eq!(cafe.qty_of(cafe.milk), 2_000_000 - 250_000);
    assert_eq!(
        cafe.qty_of(cafe.beans),
        500_000 - 18_000,
        "applied item not deducted twice"
    );

    let (_, body) = call(routes::build_router(st), get("/v1/retry/jobs")).await;
    let jobs = parse_json(body);
    assert_eq!(jobs[0]["status"], "completed");
}
