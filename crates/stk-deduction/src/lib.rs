//! stk-deduction
//!
//! Atomic stock deduction for completed sales:
//! - idempotency lookup turns replayed sales into no-ops
//! - sale lines aggregate into per-item needs through recipes and mappings
//! - one insufficient item rejects the whole request before any write
//! - writes are independent per-item CAS operations; conflicts come back
//!   retryable, never silently absorbed
//! - movement logging is detached from the sale path; every attempt lands
//!   in the sync audit log

pub mod coordinator;
pub mod errors;
pub mod plan;
pub mod traits;

pub use coordinator::DeductionCoordinator;
pub use errors::{DeductionError, SystemFault};
pub use plan::{ItemNeed, PlannedCas, SufficiencyCheck};
pub use traits::{CatalogStore, IdempotencyRecord, IdempotencyStore, MappingStore};
