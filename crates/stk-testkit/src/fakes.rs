//! In-process fakes for the storage seams. Deterministic, lock-based, no IO.
//!
//! The conflict-injecting [`FlakyStock`] is the workhorse: it forces the
//! compare-and-set failures that drive the retry scenarios without needing
//! real contention.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use stk_audit::SyncAuditSink;
use stk_deduction::{CatalogStore, IdempotencyRecord, IdempotencyStore, MappingStore, SystemFault};
use stk_ledger::{CasOutcome, LedgerError, MemoryStockStore, StockLevel, StockStore};
use stk_schemas::{IngredientMapping, RecipeComponent, SyncOutcome, SyncStatus};

// ---------------------------------------------------------------------------
// Catalog + mappings
// ---------------------------------------------------------------------------

/// Fixed product -> recipe table, store-agnostic.
#[derive(Default)]
pub struct FixedCatalog {
    recipes: BTreeMap<Uuid, Vec<RecipeComponent>>,
}

impl FixedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: Uuid, recipe: Vec<RecipeComponent>) {
        self.recipes.insert(product_id, recipe);
    }
}

#[async_trait]
impl CatalogStore for FixedCatalog {
    async fn recipe_for_product(
        &self,
        _store_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Vec<RecipeComponent>>, SystemFault> {
        Ok(self.recipes.get(&product_id).cloned())
    }
}

pub struct FixedMappings {
    rows: Vec<IngredientMapping>,
}

impl FixedMappings {
    pub fn new(rows: Vec<IngredientMapping>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl MappingStore for FixedMappings {
    async fn mappings_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<IngredientMapping>, SystemFault> {
        Ok(self
            .rows
            .iter()
            .filter(|m| m.store_id == store_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Idempotency
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryIdempotency {
    map: Mutex<BTreeMap<Uuid, IdempotencyRecord>>,
}

impl MemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, sale_id: Uuid) -> bool {
        self.lock().contains_key(&sale_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<Uuid, IdempotencyRecord>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotency {
    async fn lookup(&self, sale_id: Uuid) -> Result<Option<IdempotencyRecord>, SystemFault> {
        Ok(self.lock().get(&sale_id).cloned())
    }

    async fn record(&self, record: IdempotencyRecord) -> Result<(), SystemFault> {
        self.lock().entry(record.sale_id).or_insert(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Audit recorder
// ---------------------------------------------------------------------------

/// Captures outcomes for assertions. Recovery scenarios that exercise
/// `recent_unresolved` use the real file-backed log instead; this recorder
/// reports nothing unresolved.
#[derive(Default)]
pub struct RecordingAudit {
    outcomes: Mutex<Vec<SyncOutcome>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<SyncOutcome> {
        self.lock().clone()
    }

    pub fn statuses(&self) -> Vec<SyncStatus> {
        self.lock().iter().map(|o| o.status).collect()
    }

    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SyncOutcome>> {
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SyncAuditSink for RecordingAudit {
    async fn record_outcome(&self, outcome: SyncOutcome) -> anyhow::Result<()> {
        self.lock().push(outcome);
        Ok(())
    }

    async fn recent_unresolved(
        &self,
        _now: DateTime<Utc>,
        _window_hours: i64,
        _limit: usize,
    ) -> anyhow::Result<Vec<SyncOutcome>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Conflict injection
// ---------------------------------------------------------------------------

/// Wraps a [`MemoryStockStore`] and answers the next `n` conditional updates
/// for a listed item with `Conflict`, without touching the level. Reads pass
/// straight through.
pub struct FlakyStock {
    inner: Arc<MemoryStockStore>,
    conflicts: Mutex<BTreeMap<Uuid, u32>>,
}

impl FlakyStock {
    pub fn new(inner: Arc<MemoryStockStore>) -> Self {
        Self {
            inner,
            conflicts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn conflict_next(&self, item_id: Uuid, times: u32) {
        self.conflicts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(item_id, times);
    }

    fn take_conflict(&self, item_id: Uuid) -> bool {
        let mut map = self.conflicts.lock().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(&item_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                if *n == 0 {
                    map.remove(&item_id);
                }
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl StockStore for FlakyStock {
    async fn list_active(&self, store_id: Uuid) -> Result<Vec<StockLevel>, LedgerError> {
        self.inner.list_active(store_id).await
    }

    async fn fetch(
        &self,
        store_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<StockLevel>, LedgerError> {
        self.inner.fetch(store_id, item_id).await
    }

    async fn conditional_update(
        &self,
        store_id: Uuid,
        item_id: Uuid,
        new_qty_milli: i64,
        expected_version: i64,
    ) -> Result<CasOutcome, LedgerError> {
        if self.take_conflict(item_id) {
            return Ok(CasOutcome::Conflict {
                actual_version: expected_version + 1,
            });
        }
        self.inner
            .conditional_update(store_id, item_id, new_qty_milli, expected_version)
            .await
    }
}

// ---------------------------------------------------------------------------
// Async helpers
// ---------------------------------------------------------------------------

/// Poll until the store has recorded at least `n` movement entries. The
/// coordinator logs movements on a detached task, so tests wait instead of
/// asserting immediately.
pub async fn wait_for_movements(stock: &MemoryStockStore, n: usize) {
    for _ in 0..400 {
        if stock.movement_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("movement sink never reached {n} entries");
}
