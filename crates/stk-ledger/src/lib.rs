//! stk-ledger
//!
//! Stock Ledger: per-store, versioned inventory levels with compare-and-set
//! updates.
//! - Quantities are integer milliunits (see [`qty`]), never negative
//! - Every successful update bumps `version` by exactly 1
//! - `conditional_update` applies iff the caller's expected version still
//!   matches; a conflict mutates nothing
//! - Movement entries carry deterministic ids so redelivery cannot
//!   double-insert
//!
//! The [`MemoryStockStore`] is the deterministic in-process implementation;
//! `stk-db` provides the Postgres one behind the same traits.

pub mod qty;

mod memory;

pub use memory::MemoryStockStore;
pub use qty::{milli_to_qty, qty_to_milli, QtyError, MILLI_PER_UNIT};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One inventory row as the deduction surface sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub store_id: Uuid,
    pub item_id: Uuid,
    pub name: String,
    pub unit: String,
    pub qty_milli: i64,
    pub version: i64,
    pub active: bool,
}

/// Result of a compare-and-set attempt. `Conflict` and `Missing` leave the
/// store untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CasOutcome {
    Applied { new_version: i64 },
    Conflict { actual_version: i64 },
    Missing,
}

/// One applied stock delta, traceable back to its sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    /// Deterministic: `stk_schemas::movement_id(sale_id, item_id)`.
    pub movement_id: Uuid,
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub item_id: Uuid,
    pub item_name: String,
    /// Negative for deductions.
    pub delta_milli: i64,
    pub previous_qty_milli: i64,
    pub new_qty_milli: i64,
    pub ts_utc: DateTime<Utc>,
}

impl MovementEntry {
    /// Build a deduction movement for an applied CAS.
    pub fn deduction(
        sale_id: Uuid,
        level: &StockLevel,
        qty_milli: i64,
        ts_utc: DateTime<Utc>,
    ) -> Self {
        MovementEntry {
            movement_id: stk_schemas::movement_id(sale_id, level.item_id),
            sale_id,
            store_id: level.store_id,
            item_id: level.item_id,
            item_name: level.name.clone(),
            delta_milli: -qty_milli,
            previous_qty_milli: level.qty_milli,
            new_qty_milli: level.qty_milli - qty_milli,
            ts_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Invariant violations and storage failures surfaced by stock stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Deduction quantity must be strictly positive.
    NonPositiveQty { qty_milli: i64 },
    /// A CAS target below zero never reaches storage. Never clamped.
    NegativeTarget { item_id: Uuid, target_milli: i64 },
    /// The update would take the level below zero. Never clamped.
    WouldGoNegative {
        item_id: Uuid,
        have_milli: i64,
        need_milli: i64,
    },
    /// Backing storage failed (connection, query, constraint).
    Storage { detail: String },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::NonPositiveQty { qty_milli } => {
                write!(f, "ledger invariant: qty_milli must be > 0, got {qty_milli}")
            }
            LedgerError::NegativeTarget {
                item_id,
                target_milli,
            } => write!(
                f,
                "ledger invariant: refusing CAS of item {item_id} to negative level {target_milli}"
            ),
            LedgerError::WouldGoNegative {
                item_id,
                have_milli,
                need_milli,
            } => write!(
                f,
                "ledger invariant: item {item_id} holds {have_milli} milli, deducting {need_milli} would go negative"
            ),
            LedgerError::Storage { detail } => write!(f, "stock store failure: {detail}"),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Store seams
// ---------------------------------------------------------------------------

/// Read/CAS surface over a store's stock levels. Implementations must make
/// `conditional_update` atomic with respect to concurrent callers: of two
/// racing updates against the same version, exactly one applies.
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn list_active(&self, store_id: Uuid) -> Result<Vec<StockLevel>, LedgerError>;

    async fn fetch(&self, store_id: Uuid, item_id: Uuid)
        -> Result<Option<StockLevel>, LedgerError>;

    /// Set the level to `new_qty_milli` iff the stored version equals
    /// `expected_version`. Rejects negative targets outright.
    async fn conditional_update(
        &self,
        store_id: Uuid,
        item_id: Uuid,
        new_qty_milli: i64,
        expected_version: i64,
    ) -> Result<CasOutcome, LedgerError>;
}

/// Destination for movement entries. Writes must be idempotent on
/// `movement_id`.
#[async_trait]
pub trait MovementSink: Send + Sync {
    async fn record(&self, entry: MovementEntry) -> Result<(), LedgerError>;
}

// Arc-wrapped stores delegate, so callers can share one store between the
// coordinator and background tasks (or hold it as `Arc<dyn StockStore>`).

#[async_trait]
impl<T: StockStore + ?Sized> StockStore for std::sync::Arc<T> {
    async fn list_active(&self, store_id: Uuid) -> Result<Vec<StockLevel>, LedgerError> {
        (**self).list_active(store_id).await
    }

    async fn fetch(
        &self,
        store_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<StockLevel>, LedgerError> {
        (**self).fetch(store_id, item_id).await
    }

    async fn conditional_update(
        &self,
        store_id: Uuid,
        item_id: Uuid,
        new_qty_milli: i64,
        expected_version: i64,
    ) -> Result<CasOutcome, LedgerError> {
        (**self)
            .conditional_update(store_id, item_id, new_qty_milli, expected_version)
            .await
    }
}

#[async_trait]
impl<T: MovementSink + ?Sized> MovementSink for std::sync::Arc<T> {
    async fn record(&self, entry: MovementEntry) -> Result<(), LedgerError> {
        (**self).record(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deduction_movement_carries_before_and_after() {
        let level = StockLevel {
            store_id: Uuid::new_v4(),
            item_id: Uuid::new_v4(),
            name: "Croffle Mix".into(),
            unit: "g".into(),
            qty_milli: 10_000,
            version: 3,
            active: true,
        };
        let sale = Uuid::new_v4();
        let m = MovementEntry::deduction(sale, &level, 2_500, Utc::now());
        assert_eq!(m.delta_milli, -2_500);
        assert_eq!(m.previous_qty_milli, 10_000);
        assert_eq!(m.new_qty_milli, 7_500);
        assert_eq!(m.movement_id, stk_schemas::movement_id(sale, level.item_id));
    }

    #[test]
    fn ledger_errors_render_their_evidence() {
        let item = Uuid::new_v4();
        let e = LedgerError::WouldGoNegative {
            item_id: item,
            have_milli: 100,
            need_milli: 250,
        };
        let s = e.to_string();
        assert!(s.contains("100"));
        assert!(s.contains("250"));
        assert!(s.contains(&item.to_string()));
    }
}
