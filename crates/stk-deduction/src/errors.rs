//! Deduction failure taxonomy.

use std::fmt;

use uuid::Uuid;

use stk_schemas::ReportError;

/// Infrastructure failure from a storage collaborator. Always retryable:
/// the request itself may be fine, the backend was not.
#[derive(Debug, Clone)]
pub struct SystemFault {
    pub detail: String,
}

impl SystemFault {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SystemFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "storage fault: {}", self.detail)
    }
}

impl std::error::Error for SystemFault {}

/// One reason a sale line (or the whole request) did not deduct. Data
/// problems are terminal; conflicts and faults are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeductionError {
    RecipeMissing {
        product_id: Uuid,
        product: String,
    },
    MappingIncomplete {
        product_id: Uuid,
        product: String,
        ingredient: String,
    },
    ItemVanished {
        item_id: Uuid,
    },
    InsufficientStock {
        item_id: Uuid,
        name: String,
        have_milli: i64,
        need_milli: i64,
    },
    ConcurrencyConflict {
        item_id: Uuid,
        name: String,
    },
    System {
        detail: String,
    },
}

impl DeductionError {
    pub fn code(&self) -> &'static str {
        match self {
            DeductionError::RecipeMissing { .. } => "recipe_missing",
            DeductionError::MappingIncomplete { .. } => "mapping_incomplete",
            DeductionError::ItemVanished { .. } => "item_unavailable",
            DeductionError::InsufficientStock { .. } => "insufficient_stock",
            DeductionError::ConcurrencyConflict { .. } => "concurrency_conflict",
            DeductionError::System { .. } => "system",
        }
    }

    /// Conflicts and faults can succeed on a later attempt; bad data cannot.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            DeductionError::ConcurrencyConflict { .. } | DeductionError::System { .. }
        )
    }

    pub fn product_id(&self) -> Option<Uuid> {
        match self {
            DeductionError::RecipeMissing { product_id, .. }
            | DeductionError::MappingIncomplete { product_id, .. } => Some(*product_id),
            _ => None,
        }
    }

    pub fn item_id(&self) -> Option<Uuid> {
        match self {
            DeductionError::ItemVanished { item_id }
            | DeductionError::InsufficientStock { item_id, .. }
            | DeductionError::ConcurrencyConflict { item_id, .. } => Some(*item_id),
            _ => None,
        }
    }

    pub fn to_report(&self) -> ReportError {
        ReportError {
            code: self.code().to_string(),
            message: self.to_string(),
            product_id: self.product_id(),
            item_id: self.item_id(),
            retryable: self.retryable(),
        }
    }
}

impl fmt::Display for DeductionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeductionError::RecipeMissing { product, .. } => {
                write!(f, "no recipe on file for product '{product}'")
            }
            DeductionError::MappingIncomplete {
                product, ingredient, ..
            } => {
                write!(
                    f,
                    "product '{product}' has no ingredient mapping for '{ingredient}'"
                )
            }
            DeductionError::ItemVanished { item_id } => {
                write!(f, "inventory item {item_id} is missing or inactive")
            }
            DeductionError::InsufficientStock {
                name,
                have_milli,
                need_milli,
                ..
            } => {
                write!(
                    f,
                    "insufficient stock for '{name}': have {have_milli} milli, need {need_milli} milli"
                )
            }
            DeductionError::ConcurrencyConflict { name, .. } => {
                write!(f, "concurrent update detected for '{name}', retry required")
            }
            DeductionError::System { detail } => write!(f, "system failure: {detail}"),
        }
    }
}

impl std::error::Error for DeductionError {}
