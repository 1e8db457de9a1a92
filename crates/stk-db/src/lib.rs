//! stk-db
//!
//! Postgres persistence:
//! - pool setup from `STK_DATABASE_URL` and embedded sqlx migrations
//! - [`stores`] implements the storage seams (stock, catalog, mappings,
//!   idempotency, movements, sync audit) over the pool
//! - admin upserts for seeding stores and persisting resolved mappings
//!
//! The compare-and-set in [`stores::PgStockStore`] is the authoritative
//! concurrency control; the `qty_milli >= 0` CHECK in the schema is the
//! backstop behind it.

pub mod stores;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use stk_schemas::{IngredientMapping, RecipeComponent};

pub const ENV_DB_URL: &str = "STK_DATABASE_URL";

/// Connect to Postgres using STK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL)
        .with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='stock_levels'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus { ok, has_stock_levels_table: exists })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_stock_levels_table: bool,
}

/// Count audit rows whose newest record per sale is still unresolved.
/// Used by CLI guardrails before destructive maintenance.
pub async fn count_unresolved_sales(pool: &PgPool) -> Result<i64> {
    let st = status(pool).await?;
    if !st.has_stock_levels_table {
        return Ok(0);
    }

    let (n,): (i64,) = sqlx::query_as::<_, (i64,)>(
        r#"
        select count(*)::bigint
        from (
            select distinct on (sale_id) status
            from sync_audit
            order by sale_id, seq desc
        ) latest
        where latest.status in ('partial', 'failed', 'retry_partial', 'retry_failed')
        "#,
    )
    .fetch_one(pool)
    .await
    .context("count_unresolved_sales failed")?;

    Ok(n)
}

/// Convenience boolean.
pub async fn has_unresolved_sales(pool: &PgPool) -> Result<bool> {
    Ok(count_unresolved_sales(pool).await? > 0)
}

// ---------------------------------------------------------------------------
// Admin upserts (seeding, mapping persistence)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewStockLevel {
    pub store_id: Uuid,
    pub item_id: Uuid,
    pub name: String,
    pub unit: String,
    pub qty_milli: i64,
    pub active: bool,
}

/// Insert or replace a stock level. Replacing resets the row's contents but
/// keeps bumping `version`, so in-flight CAS attempts against the old
/// version still conflict instead of silently applying.
pub async fn upsert_stock_level(pool: &PgPool, level: &NewStockLevel) -> Result<()> {
    sqlx::query(
        r#"
        insert into stock_levels (store_id, item_id, name, unit, qty_milli, active)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (store_id, item_id) do update
        set name = excluded.name,
            unit = excluded.unit,
            qty_milli = excluded.qty_milli,
            active = excluded.active,
            version = stock_levels.version + 1,
            updated_at_utc = now()
        "#,
    )
    .bind(level.store_id)
    .bind(level.item_id)
    .bind(&level.name)
    .bind(&level.unit)
    .bind(level.qty_milli)
    .bind(level.active)
    .execute(pool)
    .await
    .context("upsert_stock_level failed")?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub components: Vec<RecipeComponent>,
}

pub async fn upsert_recipe(pool: &PgPool, recipe: &NewRecipe) -> Result<()> {
    let components: Value =
        serde_json::to_value(&recipe.components).context("recipe components serialize failed")?;

    sqlx::query(
        r#"
        insert into recipes (store_id, product_id, product_name, components)
        values ($1, $2, $3, $4)
        on conflict (store_id, product_id) do update
        set product_name = excluded.product_name,
            components = excluded.components,
            updated_at_utc = now()
        "#,
    )
    .bind(recipe.store_id)
    .bind(recipe.product_id)
    .bind(&recipe.product_name)
    .bind(&components)
    .execute(pool)
    .await
    .context("upsert_recipe failed")?;

    Ok(())
}

/// Persist one resolved ingredient link. Re-resolving the same
/// (store, product, ingredient) replaces the target item.
pub async fn upsert_mapping(pool: &PgPool, mapping: &IngredientMapping) -> Result<()> {
    sqlx::query(
        r#"
        insert into ingredient_mappings (store_id, product_id, ingredient_name, item_id, unit)
        values ($1, $2, $3, $4, $5)
        on conflict (store_id, product_id, ingredient_name) do update
        set item_id = excluded.item_id,
            unit = excluded.unit,
            created_at_utc = now()
        "#,
    )
    .bind(mapping.store_id)
    .bind(mapping.product_id)
    .bind(&mapping.ingredient_name)
    .bind(mapping.item_id)
    .bind(&mapping.unit)
    .execute(pool)
    .await
    .context("upsert_mapping failed")?;

    Ok(())
}

/// Newest audit rows for one sale, oldest attempt first.
pub async fn audit_trail_for_sale(
    pool: &PgPool,
    sale_id: Uuid,
) -> Result<Vec<AuditTrailRow>> {
    let rows = sqlx::query_as::<_, (i64, String, i32, Option<String>, DateTime<Utc>)>(
        r#"
        select seq, status, attempt, error_details, ts_utc
        from sync_audit
        where sale_id = $1
        order by seq asc
        "#,
    )
    .bind(sale_id)
    .fetch_all(pool)
    .await
    .context("audit_trail_for_sale failed")?;

    Ok(rows
        .into_iter()
        .map(|(seq, status, attempt, error_details, ts_utc)| AuditTrailRow {
            seq,
            status,
            attempt: attempt as u32,
            error_details,
            ts_utc,
        })
        .collect())
}

#[derive(Debug, Clone)]
pub struct AuditTrailRow {
    pub seq: i64,
    pub status: String,
    pub attempt: u32,
    pub error_details: Option<String>,
    pub ts_utc: DateTime<Utc>,
}
