//! Deterministic in-memory stock store.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `BTreeMap` keyed by (store_id, item_id): stable iteration order.
//! - One `Mutex` over the whole map: `conditional_update` is atomic with
//!   respect to concurrent tasks by construction, which is exactly the
//!   guarantee the CAS contract demands.
//! - No randomness, no clock; timestamps belong to callers.
//!
//! Serves as the daemon's store when no database is configured, and as the
//! reference implementation every scenario test runs against.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{CasOutcome, LedgerError, MovementEntry, MovementSink, StockLevel, StockStore};

#[derive(Debug, Default)]
pub struct MemoryStockStore {
    levels: Mutex<BTreeMap<(Uuid, Uuid), StockLevel>>,
    movements: Mutex<BTreeMap<Uuid, MovementEntry>>,
}

impl MemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a level row. Version is taken as given so tests can
    /// stage specific histories.
    pub fn put(&self, level: StockLevel) {
        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        levels.insert((level.store_id, level.item_id), level);
    }

    /// Convenience seeding: a fresh active row at version 1.
    pub fn seed(&self, store_id: Uuid, item_id: Uuid, name: &str, unit: &str, qty_milli: i64) {
        self.put(StockLevel {
            store_id,
            item_id,
            name: name.to_string(),
            unit: unit.to_string(),
            qty_milli,
            version: 1,
            active: true,
        });
    }

    /// Every level row, active or not, for synchronous inspection in tests.
    pub fn levels_snapshot(&self) -> Vec<StockLevel> {
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn movement_count(&self) -> usize {
        self.movements.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn movements(&self) -> Vec<MovementEntry> {
        self.movements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Sum of recorded deltas for one item (negative for net deductions).
    pub fn net_delta_milli(&self, item_id: Uuid) -> i64 {
        self.movements
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|m| m.item_id == item_id)
            .map(|m| m.delta_milli)
            .sum()
    }
}

#[async_trait]
impl StockStore for MemoryStockStore {
    async fn list_active(&self, store_id: Uuid) -> Result<Vec<StockLevel>, LedgerError> {
        let levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(levels
            .values()
            .filter(|l| l.store_id == store_id && l.active)
            .cloned()
            .collect())
    }

    async fn fetch(
        &self,
        store_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<StockLevel>, LedgerError> {
        let levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(levels.get(&(store_id, item_id)).cloned())
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
        let mut levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(level) = levels.get_mut(&(store_id, item_id)) else {
            return Ok(CasOutcome::Missing);
        };
        if level.version != expected_version {
            return Ok(CasOutcome::Conflict {
                actual_version: level.version,
            });
        }
        level.qty_milli = new_qty_milli;
        level.version += 1;
        Ok(CasOutcome::Applied {
            new_version: level.version,
        })
    }
}

#[async_trait]
impl MovementSink for MemoryStockStore {
    async fn record(&self, entry: MovementEntry) -> Result<(), LedgerError> {
        let mut movements = self.movements.lock().unwrap_or_else(|e| e.into_inner());
        // Idempotent on movement_id: a redelivered entry is a no-op.
        movements.entry(entry.movement_id).or_insert(entry);
        Ok(())
    }
}
