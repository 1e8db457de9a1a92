//! stk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads configuration,
//! builds the storage collaborators and shared state, wires middleware, and
//! starts the HTTP server.  All route handlers live in `routes.rs`; all
//! shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use stk_audit::{SyncAuditLog, SyncAuditSink};
use stk_config::{RetrySettings, StockKeepSettings};
use stk_daemon::{
    routes,
    state::{self, AppState, Coordinator},
};
use stk_db::stores::{
    PgCatalogStore, PgIdempotencyStore, PgMappingStore, PgMovementSink, PgStockStore, PgSyncAudit,
};
use stk_deduction::{CatalogStore, IdempotencyStore, MappingStore};
use stk_ledger::{MovementSink, StockStore};
use stk_retry::{recover_from_audit, spawn_retry_worker, RetryPolicy, RetryService};
use stk_testkit::{CafeFixture, MemoryIdempotency};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience). Silent if the file does
    // not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = stk_config::load_from_env().context("loading configuration")?;
    let settings = loaded.settings().context("parsing configuration")?;

    let retry = Arc::new(RetryService::new(retry_policy(&settings.retry)));
    let (coordinator, audit, storage) = build_collaborators(&settings).await?;

    // The audit log is the durable job state: reopen unresolved sales from
    // it before the first scan so a restart drops nothing.
    let recovered = recover_from_audit(&retry, audit.as_ref())
        .await
        .context("recovering retry queue from audit log")?;

    let shared = Arc::new(AppState::new(
        coordinator,
        Arc::clone(&retry),
        storage,
        loaded.config_hash.clone(),
        recovered,
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));
    state::spawn_status_refresh(Arc::clone(&shared), Duration::from_secs(5));
    let _ = spawn_retry_worker(Arc::clone(&retry), state::retry_executor(Arc::clone(&shared)));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&settings)?;
    info!(
        %addr,
        storage,
        recovered,
        config_hash = %loaded.config_hash,
        "stk-daemon listening"
    );

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// Retry knobs come from the config surface; the policy struct is what the
/// queue actually consumes.
fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: settings.base_delay_ms,
        max_delay_ms: settings.max_delay_ms,
        max_attempts: settings.max_attempts,
        concurrency: settings.concurrency,
        scan_interval: Duration::from_secs(settings.scan_interval_secs),
    }
}

/// Storage selection: `STK_DATABASE_URL` set means Postgres end to end;
/// unset means the in-memory demo store with a JSONL audit log, so the
/// daemon is usable on a laptop with no database at all.
async fn build_collaborators(
    settings: &StockKeepSettings,
) -> anyhow::Result<(Coordinator, Arc<dyn SyncAuditSink>, &'static str)> {
    if std::env::var(stk_db::ENV_DB_URL).is_ok() {
        let pool = stk_db::connect_from_env().await?;
        stk_db::migrate(&pool).await.context("running migrations")?;

        let audit: Arc<dyn SyncAuditSink> = Arc::new(PgSyncAudit::new(pool.clone()));
        let coordinator = Coordinator::new(
            Arc::new(PgCatalogStore::new(pool.clone())) as Arc<dyn CatalogStore>,
            Arc::new(PgMappingStore::new(pool.clone())) as Arc<dyn MappingStore>,
            Arc::new(PgStockStore::new(pool.clone())) as Arc<dyn StockStore>,
            Arc::new(PgMovementSink::new(pool.clone())) as Arc<dyn MovementSink>,
            Arc::new(PgIdempotencyStore::new(pool)) as Arc<dyn IdempotencyStore>,
            Arc::clone(&audit),
        );
        Ok((coordinator, audit, "postgres"))
    } else {
        let log_path = std::env::var("STK_AUDIT_LOG")
            .unwrap_or_else(|_| settings.audit.log_path.clone());
        let audit: Arc<dyn SyncAuditSink> =
            Arc::new(SyncAuditLog::open(&log_path).context("opening audit log")?);

        let cafe = CafeFixture::new();
        info!(
            store_id = %cafe.store_id,
            latte = %cafe.latte,
            americano = %cafe.americano,
            croffle = %cafe.croffle,
            "memory mode: demo cafe store seeded"
        );
        let coordinator = Coordinator::new(
            Arc::new(cafe.catalog()) as Arc<dyn CatalogStore>,
            Arc::new(cafe.mappings()) as Arc<dyn MappingStore>,
            Arc::clone(&cafe.stock) as Arc<dyn StockStore>,
            Arc::clone(&cafe.stock) as Arc<dyn MovementSink>,
            Arc::new(MemoryIdempotency::new()) as Arc<dyn IdempotencyStore>,
            Arc::clone(&audit),
        );
        Ok((coordinator, audit, "memory"))
    }
}

fn bind_addr(settings: &StockKeepSettings) -> anyhow::Result<SocketAddr> {
    let raw = std::env::var("STK_DAEMON_ADDR")
        .unwrap_or_else(|_| settings.daemon.bind_addr.clone());
    raw.parse()
        .with_context(|| format!("invalid daemon bind address '{raw}'"))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
