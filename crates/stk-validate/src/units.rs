//! Unit families and per-family plausibility windows.
//!
//! Family membership answers "are these two units even comparable"; the
//! windows answer "is this per-sale quantity believable for that kind of
//! unit". Both feed warnings only; the ledger, not the validator, is the
//! authority at deduction time.

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitFamily {
    Count,
    Mass,
    Volume,
    Serving,
    Pack,
}

const COUNT_UNITS: &[&str] = &["pieces", "pcs", "pc", "piece", "each", "unit", "units"];
const MASS_UNITS: &[&str] = &["g", "gram", "grams", "gms", "kg", "kilogram", "kilograms"];
const VOLUME_UNITS: &[&str] = &[
    "ml",
    "milliliter",
    "milliliters",
    "l",
    "liter",
    "liters",
    "litre",
    "litres",
];
const SERVING_UNITS: &[&str] = &[
    "serving", "servings", "portion", "portions", "scoop", "scoops", "shot", "shots",
];
const PACK_UNITS: &[&str] = &["pack", "packs", "box", "boxes", "pair", "pairs", "sleeve"];

/// Family of a raw unit string, or `None` for units this table has never
/// heard of (those skip family-based checks rather than warn blindly).
pub fn unit_family(unit: &str) -> Option<UnitFamily> {
    let u = unit.trim().to_lowercase();
    if COUNT_UNITS.contains(&u.as_str()) {
        Some(UnitFamily::Count)
    } else if MASS_UNITS.contains(&u.as_str()) {
        Some(UnitFamily::Mass)
    } else if VOLUME_UNITS.contains(&u.as_str()) {
        Some(UnitFamily::Volume)
    } else if SERVING_UNITS.contains(&u.as_str()) {
        Some(UnitFamily::Serving)
    } else if PACK_UNITS.contains(&u.as_str()) {
        Some(UnitFamily::Pack)
    } else {
        None
    }
}

pub fn compatible(a: &str, b: &str) -> bool {
    match (unit_family(a), unit_family(b)) {
        (Some(fa), Some(fb)) => fa == fb,
        // Unknown units never produce a mismatch warning on their own.
        _ => true,
    }
}

/// Plausible per-sale quantity window in milliunits, inclusive.
pub fn plausible_range_milli(family: UnitFamily) -> (i64, i64) {
    match family {
        UnitFamily::Count => (1, 100_000),        // 0.001 .. 100 pieces
        UnitFamily::Mass => (100, 5_000_000),     // 0.1 g .. 5 kg
        UnitFamily::Volume => (1_000, 5_000_000), // 1 ml .. 5 l
        UnitFamily::Serving => (50, 50_000),      // 0.05 .. 50 servings
        UnitFamily::Pack => (1, 20_000),          // 0.001 .. 20 packs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_family_members() {
        for u in ["pieces", "PCS", " pc ", "Each"] {
            assert_eq!(unit_family(u), Some(UnitFamily::Count), "unit {u:?}");
        }
    }

    #[test]
    fn families_are_disjoint() {
        assert_eq!(unit_family("g"), Some(UnitFamily::Mass));
        assert_eq!(unit_family("ml"), Some(UnitFamily::Volume));
        assert_eq!(unit_family("scoop"), Some(UnitFamily::Serving));
        assert_eq!(unit_family("box"), Some(UnitFamily::Pack));
    }

    #[test]
    fn unknown_unit_has_no_family() {
        assert_eq!(unit_family("smidgen"), None);
    }

    #[test]
    fn compatibility_within_and_across_families() {
        assert!(compatible("pieces", "each"));
        assert!(compatible("g", "kg"));
        assert!(!compatible("pieces", "g"));
        assert!(!compatible("ml", "box"));
        // unknown units stay silent
        assert!(compatible("smidgen", "g"));
    }

    #[test]
    fn plausibility_windows_are_ordered() {
        for f in [
            UnitFamily::Count,
            UnitFamily::Mass,
            UnitFamily::Volume,
            UnitFamily::Serving,
            UnitFamily::Pack,
        ] {
            let (lo, hi) = plausible_range_milli(f);
            assert!(lo > 0 && lo < hi);
        }
    }
}
