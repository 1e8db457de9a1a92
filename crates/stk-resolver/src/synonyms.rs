//! Static synonym and token tables consulted by normalization and scoring.
//!
//! These are data, not logic: the scorer asks "are these two strings in the
//! same set?" and never hardcodes any particular ingredient.

/// Full-name synonym sets. A recipe name and an inventory name that both
/// normalize into the same set score 0.9 without any fuzzy work.
pub const SYNONYM_SETS: &[&[&str]] = &[
    &["cup", "cups", "glass", "container"],
    &["whipped cream", "whip cream", "heavy cream", "whipping cream"],
    &["pieces", "pcs", "pc", "piece", "each", "unit", "units"],
    &["chocolate syrup", "choco syrup", "chocolate sauce"],
    &["milk", "fresh milk", "whole milk"],
    &["sugar", "white sugar", "granulated sugar"],
    &["straw", "straws", "drinking straw"],
    &["lid", "lids", "dome lid", "flat lid"],
    &["takeout box", "take out box", "to go box", "togo box"],
];

/// Token-level abbreviation expansions applied during normalization.
pub const ABBREVIATIONS: &[(&str, &str)] = &[
    ("tbsp", "tablespoon"),
    ("tsp", "teaspoon"),
    ("pcs", "pieces"),
    ("pc", "piece"),
    ("qty", "quantity"),
];

/// Descriptor tokens that never distinguish one ingredient from another.
/// Stripped during normalization so "Fresh Milk" and "Milk" compare equal.
pub const DESCRIPTOR_TOKENS: &[&str] = &[
    "fresh", "frozen", "organic", "natural", "premium", "regular", "chopped", "diced", "sliced",
    "dried", "powdered", "mini", "small", "large", "jumbo",
];

/// Sorted-token form of a curated set member, so membership tests line up
/// with normalized names (which join their tokens in sorted order).
fn canon(member: &str) -> String {
    let mut toks: Vec<&str> = member.split_whitespace().collect();
    toks.sort_unstable();
    toks.join(" ")
}

/// Index of the synonym set containing `s`, if any. `s` must be in
/// normalized joined form (lowercase, sorted tokens).
pub fn synonym_set_of(s: &str) -> Option<usize> {
    SYNONYM_SETS
        .iter()
        .position(|set| set.iter().any(|member| canon(member) == s))
}

/// True when two normalized strings sit in the same synonym set.
pub fn same_synonym_set(a: &str, b: &str) -> bool {
    match (synonym_set_of(a), synonym_set_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

pub fn expand_abbreviation(token: &str) -> &str {
    for (abbr, full) in ABBREVIATIONS {
        if *abbr == token {
            return full;
        }
    }
    token
}

pub fn is_descriptor(token: &str) -> bool {
    DESCRIPTOR_TOKENS.iter().any(|d| *d == token)
}
