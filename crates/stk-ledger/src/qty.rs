//! Integer-milli quantity representation.
//!
//! # Design invariant
//!
//! All stock quantities on the **deduction decision surface** are `i64`
//! integer milliunits (1 unit = 1_000 milli). Sufficiency comparisons and
//! conservation sums are exact integer arithmetic: two requirements that
//! would compare equal as `f64` but differ in the third decimal place stay
//! distinguishable, and summing thousands of deductions cannot drift.
//!
//! `f64` conversions happen **only** at the wire boundary:
//!
//! | Direction               | Function          | Notes                   |
//! |-------------------------|-------------------|-------------------------|
//! | internal → HTTP/display | [`milli_to_qty`]  | Serialization only      |
//! | HTTP/import → internal  | [`qty_to_milli`]  | Parsing / ingestion only|

/// Scale factor: 1 stock unit = 1_000 milli (3 decimal places).
pub const MILLI_PER_UNIT: i64 = 1_000;

/// Errors returned by [`qty_to_milli`] when the input is not representable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QtyError {
    /// Input was `NaN` or infinite.
    NotFinite,
    /// Input would overflow `i64` after scaling by [`MILLI_PER_UNIT`].
    OutOfRange,
}

impl std::fmt::Display for QtyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QtyError::NotFinite => write!(f, "qty_to_milli: non-finite input (NaN or Inf)"),
            QtyError::OutOfRange => write!(f, "qty_to_milli: quantity out of i64 range after scaling"),
        }
    }
}

impl std::error::Error for QtyError {}

/// Convert integer-milli stock to `f64` for external serialization.
pub fn milli_to_qty(milli: i64) -> f64 {
    milli as f64 / MILLI_PER_UNIT as f64
}

/// Convert an `f64` quantity from a wire payload into integer milli.
/// Rounds to the nearest milli to avoid systematic truncation bias.
pub fn qty_to_milli(qty: f64) -> Result<i64, QtyError> {
    if !qty.is_finite() {
        return Err(QtyError::NotFinite);
    }
    let scaled = qty * MILLI_PER_UNIT as f64;
    if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
        return Err(QtyError::OutOfRange);
    }
    Ok(scaled.round() as i64)
}
