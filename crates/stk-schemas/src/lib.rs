use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for uuid-v5 derivation of deterministic ids (movement entries,
/// audit records). Fixed so the same (sale, item) pair always derives the
/// same movement id across processes and retries.
pub const STK_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x1f, 0x6e, 0x0d, 0x8c, 0x2a, 0x4f, 0x7b, 0x9e, 0x41, 0x3d, 0x55, 0xa2, 0x90, 0x17, 0xc4,
]);

/// Deterministic movement id for one applied stock delta of one sale.
/// Redelivered writes collide on this id instead of double-inserting.
pub fn movement_id(sale_id: Uuid, item_id: Uuid) -> Uuid {
    let seed = format!("movement:{sale_id}:{item_id}");
    Uuid::new_v5(&STK_ID_NAMESPACE, seed.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: Uuid,
    pub product_name: String,
    /// Units of the product sold (whole products, not milliunits).
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionRequest {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub lines: Vec<SaleLine>,
}

/// One ingredient a recipe consumes per unit of product sold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeComponent {
    pub ingredient_name: String,
    /// Quantity per product unit, in milliunits of `unit`.
    pub qty_milli: i64,
    pub unit: String,
}

/// Persisted link from a recipe ingredient to a concrete inventory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngredientMapping {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub ingredient_name: String,
    pub item_id: Uuid,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductedLine {
    pub item_id: Uuid,
    pub name: String,
    pub qty_milli: i64,
    pub previous_qty_milli: i64,
    pub new_qty_milli: i64,
    pub new_version: i64,
}

/// Wire form of one deduction failure. `code` mirrors the error taxonomy
/// (`mapping_incomplete`, `insufficient_stock`, `concurrency_conflict`,
/// `system`); `retryable` tells callers whether the retry queue can help.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportError {
    pub code: String,
    pub message: String,
    pub product_id: Option<Uuid>,
    pub item_id: Option<Uuid>,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeductionReport {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub success: bool,
    /// True when an idempotency record short-circuited the request.
    pub duplicate: bool,
    pub deducted: Vec<DeductedLine>,
    pub errors: Vec<ReportError>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl DeductionReport {
    pub fn has_retryable_errors(&self) -> bool {
        self.errors.iter().any(|e| e.retryable)
    }

    /// Item ids that actually applied; a retry must exclude these.
    pub fn applied_item_ids(&self) -> Vec<Uuid> {
        self.deducted.iter().map(|d| d.item_id).collect()
    }
}

// ---------------------------------------------------------------------------
// Sync outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
    RetrySuccess,
    RetryPartial,
    RetryFailed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
            SyncStatus::RetrySuccess => "retry_success",
            SyncStatus::RetryPartial => "retry_partial",
            SyncStatus::RetryFailed => "retry_failed",
        }
    }

    pub fn parse(s: &str) -> Option<SyncStatus> {
        match s {
            "success" => Some(SyncStatus::Success),
            "partial" => Some(SyncStatus::Partial),
            "failed" => Some(SyncStatus::Failed),
            "retry_success" => Some(SyncStatus::RetrySuccess),
            "retry_partial" => Some(SyncStatus::RetryPartial),
            "retry_failed" => Some(SyncStatus::RetryFailed),
            _ => None,
        }
    }

    /// An unresolved outcome still owes the store stock; startup recovery
    /// re-enqueues these.
    pub fn is_unresolved(&self) -> bool {
        matches!(
            self,
            SyncStatus::Partial
                | SyncStatus::Failed
                | SyncStatus::RetryPartial
                | SyncStatus::RetryFailed
        )
    }

    /// The retry-attempt flavor of this status. Attempts after the first are
    /// logged with these so recovery can tell a fresh failure from a retried
    /// one.
    pub fn as_retry(self) -> SyncStatus {
        match self {
            SyncStatus::Success => SyncStatus::RetrySuccess,
            SyncStatus::Partial => SyncStatus::RetryPartial,
            SyncStatus::Failed => SyncStatus::RetryFailed,
            already_retry => already_retry,
        }
    }
}

/// One attempt outcome, as appended to the sync audit log.
///
/// Carries enough to retry the sale from the log alone: the original lines
/// plus every item id that has applied so far (cumulative across attempts).
/// Startup recovery rebuilds jobs from the latest record per sale, so a
/// record must be self-sufficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub status: SyncStatus,
    pub attempt: u32,
    pub items_processed: u32,
    pub duration_ms: u64,
    pub error_details: Option<String>,
    pub lines: Vec<SaleLine>,
    pub applied_items: Vec<Uuid>,
    pub ts_utc: DateTime<Utc>,
}
