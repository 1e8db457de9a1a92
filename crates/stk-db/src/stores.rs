//! Postgres implementations of the storage seams.
//!
//! One newtype per seam, all sharing the pool by clone. The CAS in
//! [`PgStockStore`] rides on `update ... where version = $n`: of two racers
//! against the same version, Postgres applies exactly one row update and the
//! loser sees zero rows affected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use stk_audit::SyncAuditSink;
use stk_deduction::{CatalogStore, IdempotencyRecord, IdempotencyStore, MappingStore, SystemFault};
use stk_ledger::{CasOutcome, LedgerError, MovementEntry, MovementSink, StockStore, StockLevel};
use stk_schemas::{IngredientMapping, RecipeComponent, SaleLine, SyncOutcome, SyncStatus};

fn storage(context: &str, e: sqlx::Error) -> LedgerError {
    LedgerError::Storage {
        detail: format!("{context}: {e}"),
    }
}

fn fault(context: &str, e: sqlx::Error) -> SystemFault {
    SystemFault::new(format!("{context}: {e}"))
}

// ---------------------------------------------------------------------------
// Stock levels
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStockStore {
    pool: PgPool,
}

impl PgStockStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn level_from_row(row: &sqlx::postgres::PgRow) -> Result<StockLevel, sqlx::Error> {
    Ok(StockLevel {
        store_id: row.try_get("store_id")?,
        item_id: row.try_get("item_id")?,
        name: row.try_get("name")?,
        unit: row.try_get("unit")?,
        qty_milli: row.try_get("qty_milli")?,
        version: row.try_get("version")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl StockStore for PgStockStore {
    async fn list_active(&self, store_id: Uuid) -> Result<Vec<StockLevel>, LedgerError> {
        let rows = sqlx::query(
            r#"
            select store_id, item_id, name, unit, qty_milli, version, active
            from stock_levels
            where store_id = $1 and active
            order by name
            "#,
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("list_active query", e))?;

        rows.iter()
            .map(|r| level_from_row(r).map_err(|e| storage("list_active row", e)))
            .collect()
    }

    async fn fetch(
        &self,
        store_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<StockLevel>, LedgerError> {
        let row = sqlx::query(
            r#"
            select store_id, item_id, name, unit, qty_milli, version, active
            from stock_levels
            where store_id = $1 and item_id = $2
            "#,
        )
        .bind(store_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("fetch query", e))?;

        match row {
            Some(r) => Ok(Some(level_from_row(&r).map_err(|e| storage("fetch row", e))?)),
            None => Ok(None),
        }
    }

    async fn conditional_update(
        &self,
        store_id: Uuid,
        item_id: Uuid,
        new_qty_milli: i64,
        expected_version: i64,
    ) -> Result<CasOutcome, LedgerError> {
        if new_qty_milli < 0 {
            return Err(LedgerError::NegativeTarget {
                item_id,
                target_milli: new_qty_milli,
            });
        }

        let applied = sqlx::query(
            r#"
            update stock_levels
            set qty_milli = $3,
                version = version + 1,
                updated_at_utc = now()
            where store_id = $1 and item_id = $2 and version = $4
            returning version
            "#,
        )
        .bind(store_id)
        .bind(item_id)
        .bind(new_qty_milli)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("conditional_update", e))?;

        if let Some(row) = applied {
            let new_version: i64 = row
                .try_get("version")
                .map_err(|e| storage("conditional_update returning", e))?;
            return Ok(CasOutcome::Applied { new_version });
        }

        // Zero rows: either the row is gone or someone moved the version.
        match self.fetch(store_id, item_id).await? {
            Some(current) => Ok(CasOutcome::Conflict {
                actual_version: current.version,
            }),
            None => Ok(CasOutcome::Missing),
        }
    }
}

// ---------------------------------------------------------------------------
// Movements
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgMovementSink {
    pool: PgPool,
}

impl PgMovementSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MovementSink for PgMovementSink {
    async fn record(&self, entry: MovementEntry) -> Result<(), LedgerError> {
        // movement_id is deterministic per (sale, item); a redelivered entry
        // hits the conflict arm and inserts nothing.
        sqlx::query(
            r#"
            insert into stock_movements (
                movement_id, sale_id, store_id, item_id, item_name,
                delta_milli, previous_qty_milli, new_qty_milli, ts_utc
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            on conflict (movement_id) do nothing
            "#,
        )
        .bind(entry.movement_id)
        .bind(entry.sale_id)
        .bind(entry.store_id)
        .bind(entry.item_id)
        .bind(&entry.item_name)
        .bind(entry.delta_milli)
        .bind(entry.previous_qty_milli)
        .bind(entry.new_qty_milli)
        .bind(entry.ts_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("movement insert", e))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Catalog + mappings
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn recipe_for_product(
        &self,
        store_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Vec<RecipeComponent>>, SystemFault> {
        let row = sqlx::query(
            r#"
            select components
            from recipes
            where store_id = $1 and product_id = $2
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| fault("recipe query", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let components: serde_json::Value = row
            .try_get("components")
            .map_err(|e| fault("recipe row", e))?;
        let components: Vec<RecipeComponent> = serde_json::from_value(components)
            .map_err(|e| SystemFault::new(format!("recipe components malformed: {e}")))?;

        Ok(Some(components))
    }
}

#[derive(Clone)]
pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn mappings_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<IngredientMapping>, SystemFault> {
        let rows = sqlx::query(
            r#"
            select store_id, product_id, ingredient_name, item_id, unit
            from ingredient_mappings
            where store_id = $1
            "#,
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| fault("mappings query", e))?;

        rows.iter()
            .map(|row| {
                Ok(IngredientMapping {
                    store_id: row.try_get("store_id").map_err(|e| fault("mapping row", e))?,
                    product_id: row
                        .try_get("product_id")
                        .map_err(|e| fault("mapping row", e))?,
                    ingredient_name: row
                        .try_get("ingredient_name")
                        .map_err(|e| fault("mapping row", e))?,
                    item_id: row.try_get("item_id").map_err(|e| fault("mapping row", e))?,
                    unit: row.try_get("unit").map_err(|e| fault("mapping row", e))?,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(&self, sale_id: Uuid) -> Result<Option<IdempotencyRecord>, SystemFault> {
        let row = sqlx::query(
            r#"
            select sale_id, store_id, completed_at, items_deducted
            from deduction_idempotency
            where sale_id = $1
            "#,
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| fault("idempotency lookup", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: i32 = row
            .try_get("items_deducted")
            .map_err(|e| fault("idempotency row", e))?;
        Ok(Some(IdempotencyRecord {
            sale_id: row.try_get("sale_id").map_err(|e| fault("idempotency row", e))?,
            store_id: row
                .try_get("store_id")
                .map_err(|e| fault("idempotency row", e))?,
            completed_at: row
                .try_get("completed_at")
                .map_err(|e| fault("idempotency row", e))?,
            items_deducted: items as u32,
        }))
    }

    async fn record(&self, record: IdempotencyRecord) -> Result<(), SystemFault> {
        // First record wins; a racing duplicate lands on the conflict arm.
        sqlx::query(
            r#"
            insert into deduction_idempotency (sale_id, store_id, completed_at, items_deducted)
            values ($1, $2, $3, $4)
            on conflict (sale_id) do nothing
            "#,
        )
        .bind(record.sale_id)
        .bind(record.store_id)
        .bind(record.completed_at)
        .bind(record.items_deducted as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| fault("idempotency insert", e))?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sync audit
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgSyncAudit {
    pool: PgPool,
}

impl PgSyncAudit {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn outcome_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<SyncOutcome> {
    let status: String = row.try_get("status")?;
    let status = SyncStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("unknown sync status in audit row: {status}"))?;

    let attempt: i32 = row.try_get("attempt")?;
    let items_processed: i32 = row.try_get("items_processed")?;
    let duration_ms: i64 = row.try_get("duration_ms")?;
    let lines: serde_json::Value = row.try_get("lines")?;
    let lines: Vec<SaleLine> = serde_json::from_value(lines)?;
    let applied_items: serde_json::Value = row.try_get("applied_items")?;
    let applied_items: Vec<Uuid> = serde_json::from_value(applied_items)?;

    Ok(SyncOutcome {
        sale_id: row.try_get("sale_id")?,
        store_id: row.try_get("store_id")?,
        status,
        attempt: attempt as u32,
        items_processed: items_processed as u32,
        duration_ms: duration_ms as u64,
        error_details: row.try_get("error_details")?,
        lines,
        applied_items,
        ts_utc: row.try_get::<DateTime<Utc>, _>("ts_utc")?,
    })
}

#[async_trait]
impl SyncAuditSink for PgSyncAudit {
    async fn record_outcome(&self, outcome: SyncOutcome) -> anyhow::Result<()> {
        let lines = serde_json::to_value(&outcome.lines)?;
        let applied_items = serde_json::to_value(&outcome.applied_items)?;

        sqlx::query(
            r#"
            insert into sync_audit (
                record_id, sale_id, store_id, status, attempt,
                items_processed, duration_ms, error_details, lines,
                applied_items, ts_utc
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(outcome.sale_id)
        .bind(outcome.store_id)
        .bind(outcome.status.as_str())
        .bind(outcome.attempt as i32)
        .bind(outcome.items_processed as i32)
        .bind(outcome.duration_ms as i64)
        .bind(&outcome.error_details)
        .bind(&lines)
        .bind(&applied_items)
        .bind(outcome.ts_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::Error::new(e).context("sync audit insert failed"))?;

        Ok(())
    }

    async fn recent_unresolved(
        &self,
        now: DateTime<Utc>,
        window_hours: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<SyncOutcome>> {
        let cutoff = now - chrono::Duration::hours(window_hours);

        // Newest row per sale decides resolution; a sale whose latest attempt
        // succeeded owes nothing, however many failures led up to it.
        let rows = sqlx::query(
            r#"
            select sale_id, store_id, status, attempt, items_processed,
                   duration_ms, error_details, lines, applied_items, ts_utc
            from (
                select distinct on (sale_id) *
                from sync_audit
                order by sale_id, seq desc
            ) latest
            where latest.status in ('partial', 'failed', 'retry_partial', 'retry_failed')
              and latest.ts_utc >= $1
            order by latest.ts_utc desc, latest.seq desc
            limit $2
            "#,
        )
        .bind(cutoff)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(outcome_from_row).collect()
    }
}
