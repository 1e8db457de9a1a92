//! stk-testkit
//!
//! Shared scenario tooling:
//! - [`fakes`]: in-process implementations of every storage seam, including
//!   the conflict-injecting [`fakes::FlakyStock`]
//! - [`cafe`]: the standing cafe dataset (products, recipes, mappings,
//!   seeded stock) the cross-crate scenarios run against
//!
//! The scenarios themselves live under `tests/`.

pub mod cafe;
pub mod fakes;

pub use cafe::{sale_line, CafeFixture};
pub use fakes::{
    wait_for_movements, FixedCatalog, FixedMappings, FlakyStock, MemoryIdempotency, RecordingAudit,
};
