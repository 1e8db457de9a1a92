//! stk-resolver
//!
//! Ingredient Resolution: recipe ingredient names -> concrete inventory
//! items, with confidence scoring.
//! - Canonical normalization (order-insensitive token form)
//! - Rule ladder: exact / synonym / containment / token-average fuzzy
//! - Confidence tiers and acceptance thresholds
//! - Ambiguity detection (near-tied candidates refuse to resolve)
//! - Pure deterministic logic (no IO, no time, no randomness)

mod normalize;
mod score;
mod synonyms;

pub use normalize::{normalize, trim_plural, Normalized};
pub use score::{levenshtein, score_pair, MatchMethod, PairScore};
pub use synonyms::{same_synonym_set, synonym_set_of, DESCRIPTOR_TOKENS, SYNONYM_SETS};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acceptance threshold for ad-hoc resolution.
pub const DEFAULT_THRESHOLD: f64 = 0.6;
/// Stricter threshold used when building persisted deduction mappings.
pub const MAPPING_THRESHOLD: f64 = 0.7;
/// A runner-up within this delta of the winner makes resolution ambiguous.
pub const AMBIGUITY_DELTA: f64 = 0.05;

// ---------------------------------------------------------------------------
// Confidence tiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    /// Tier for a score, or `None` below the unmatched line (0.6).
    pub fn from_score(score: f64) -> Option<ConfidenceTier> {
        if score >= 0.95 {
            Some(ConfidenceTier::VeryHigh)
        } else if score >= 0.85 {
            Some(ConfidenceTier::High)
        } else if score >= 0.75 {
            Some(ConfidenceTier::Medium)
        } else if score >= 0.6 {
            Some(ConfidenceTier::Low)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Knobs for one resolution pass. `Default` is the ad-hoc lookup policy;
/// [`ResolvePolicy::mapping_build`] is the stricter persisted-mapping policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvePolicy {
    pub threshold: f64,
    pub ambiguity_delta: f64,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        ResolvePolicy {
            threshold: DEFAULT_THRESHOLD,
            ambiguity_delta: AMBIGUITY_DELTA,
        }
    }
}

impl ResolvePolicy {
    pub fn mapping_build() -> Self {
        ResolvePolicy {
            threshold: MAPPING_THRESHOLD,
            ambiguity_delta: AMBIGUITY_DELTA,
        }
    }
}

// ---------------------------------------------------------------------------
// Inputs / outputs
// ---------------------------------------------------------------------------

/// One inventory item offered to the resolver. Callers project their store
/// rows down to this; the resolver never sees quantities or versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: Uuid,
    pub name: String,
}

impl Candidate {
    pub fn new(item_id: Uuid, name: impl Into<String>) -> Self {
        Candidate {
            item_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMatch {
    pub item_id: Uuid,
    pub item_name: String,
    pub score: f64,
    pub tier: ConfidenceTier,
    pub method: MatchMethod,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Resolution failures are never auto-corrected: an unmatched or ambiguous
/// ingredient is surfaced to mapping tooling, not guessed at.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionError {
    /// The ingredient name normalized to nothing.
    EmptyName,
    /// No candidate reached the acceptance threshold.
    Unmatched {
        ingredient: String,
        best_score: f64,
        best_candidate: Option<String>,
    },
    /// Two candidates landed too close to call.
    Ambiguous {
        ingredient: String,
        leader: String,
        leader_score: f64,
        runner_up: String,
        runner_up_score: f64,
    },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::EmptyName => write!(f, "ingredient name is empty after normalization"),
            ResolutionError::Unmatched {
                ingredient,
                best_score,
                best_candidate,
            } => match best_candidate {
                Some(c) => write!(
                    f,
                    "no inventory match for '{ingredient}' (best: '{c}' at {best_score:.2})"
                ),
                None => write!(f, "no inventory match for '{ingredient}'"),
            },
            ResolutionError::Ambiguous {
                ingredient,
                leader,
                leader_score,
                runner_up,
                runner_up_score,
            } => write!(
                f,
                "ambiguous match for '{ingredient}': '{leader}' ({leader_score:.2}) vs '{runner_up}' ({runner_up_score:.2})"
            ),
        }
    }
}

impl std::error::Error for ResolutionError {}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve one ingredient name against a candidate set.
///
/// Every candidate is scored; the winner must clear `policy.threshold`.
/// Ties are broken deterministically: method rank (exact > containment >
/// synonym > fuzzy), then lower edit distance, then lexicographic item
/// name. A distinct runner-up within `policy.ambiguity_delta` of the winner
/// that also clears the threshold is an error, not a coin flip.
pub fn resolve(
    ingredient: &str,
    candidates: &[Candidate],
    policy: &ResolvePolicy,
) -> Result<ResolvedMatch, ResolutionError> {
    let needle = normalize(ingredient);
    if needle.is_empty() {
        return Err(ResolutionError::EmptyName);
    }

    let mut scored: Vec<(&Candidate, PairScore)> = candidates
        .iter()
        .map(|c| (c, score_pair(&needle, &normalize(&c.name))))
        .collect();

    scored.sort_by(|(ca, a), (cb, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.method.rank().cmp(&a.method.rank()))
            .then_with(|| a.distance.cmp(&b.distance))
            .then_with(|| ca.name.cmp(&cb.name))
    });

    let Some((winner, winner_score)) = scored.first() else {
        return Err(ResolutionError::Unmatched {
            ingredient: ingredient.to_string(),
            best_score: 0.0,
            best_candidate: None,
        });
    };

    if winner_score.score < policy.threshold {
        return Err(ResolutionError::Unmatched {
            ingredient: ingredient.to_string(),
            best_score: winner_score.score,
            best_candidate: Some(winner.name.clone()),
        });
    }

    // Ambiguity: a different item close enough that picking either would be
    // a guess. Same-item duplicates (shelf rows) never trip this.
    if let Some((second, second_score)) = scored
        .iter()
        .skip(1)
        .find(|(c, _)| c.item_id != winner.item_id)
    {
        let close = winner_score.score - second_score.score < policy.ambiguity_delta;
        if close && second_score.score >= policy.threshold && winner_score.score < 1.0 {
            return Err(ResolutionError::Ambiguous {
                ingredient: ingredient.to_string(),
                leader: winner.name.clone(),
                leader_score: winner_score.score,
                runner_up: second.name.clone(),
                runner_up_score: second_score.score,
            });
        }
    }

    let tier = match ConfidenceTier::from_score(winner_score.score) {
        Some(t) => t,
        None => {
            return Err(ResolutionError::Unmatched {
                ingredient: ingredient.to_string(),
                best_score: winner_score.score,
                best_candidate: Some(winner.name.clone()),
            })
        }
    };

    Ok(ResolvedMatch {
        item_id: winner.item_id,
        item_name: winner.name.clone(),
        score: winner_score.score,
        tier,
        method: winner_score.method,
    })
}

/// Resolve a whole ingredient list, all-or-nothing: the first unmatched or
/// ambiguous ingredient fails the entire set and nothing is returned.
/// Used by the mapping-build path, which must never persist a partial map.
pub fn resolve_all(
    ingredients: &[&str],
    candidates: &[Candidate],
    policy: &ResolvePolicy,
) -> Result<Vec<ResolvedMatch>, ResolutionError> {
    let mut out = Vec::with_capacity(ingredients.len());
    for ing in ingredients {
        out.push(resolve(ing, candidates, policy)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn items(names: &[&str]) -> Vec<Candidate> {
        names
            .iter()
            .map(|n| Candidate::new(Uuid::new_v4(), *n))
            .collect()
    }

    // --- tiers ---

    #[test]
    fn tier_boundaries() {
        assert_eq!(ConfidenceTier::from_score(1.0), Some(ConfidenceTier::VeryHigh));
        assert_eq!(ConfidenceTier::from_score(0.95), Some(ConfidenceTier::VeryHigh));
        assert_eq!(ConfidenceTier::from_score(0.94), Some(ConfidenceTier::High));
        assert_eq!(ConfidenceTier::from_score(0.85), Some(ConfidenceTier::High));
        assert_eq!(ConfidenceTier::from_score(0.84), Some(ConfidenceTier::Medium));
        assert_eq!(ConfidenceTier::from_score(0.75), Some(ConfidenceTier::Medium));
        assert_eq!(ConfidenceTier::from_score(0.74), Some(ConfidenceTier::Low));
        assert_eq!(ConfidenceTier::from_score(0.6), Some(ConfidenceTier::Low));
        assert_eq!(ConfidenceTier::from_score(0.59), None);
    }

    // --- resolve: winners ---

    #[test]
    fn exact_normalized_match_wins_at_one_point_zero() {
        let inv = items(&["Crushed Oreo", "Oreo Cookies"]);
        let m = resolve("Oreo Crushed", &inv, &ResolvePolicy::default()).unwrap();
        assert_eq!(m.item_name, "Crushed Oreo");
        assert_eq!(m.score, 1.0);
        assert_eq!(m.tier, ConfidenceTier::VeryHigh);
        assert_eq!(m.method, MatchMethod::Exact);
    }

    #[test]
    fn reordered_plural_name_resolves_high() {
        let inv = items(&["Plastic Cup 16oz", "Paper Bag Small"]);
        let m = resolve("16oz Plastic Cups", &inv, &ResolvePolicy::default()).unwrap();
        assert_eq!(m.item_name, "Plastic Cup 16oz");
        assert!(m.score >= 0.85, "got {}", m.score);
        assert!(matches!(
            m.tier,
            ConfidenceTier::High | ConfidenceTier::VeryHigh
        ));
    }

    #[test]
    fn synonym_resolves_through_table() {
        let inv = items(&["Container", "Stirrer"]);
        let m = resolve("Cups", &inv, &ResolvePolicy::default()).unwrap();
        assert_eq!(m.item_name, "Container");
        assert_eq!(m.method, MatchMethod::Synonym);
        assert!((m.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn argument_order_never_flips_the_winner() {
        // The scorer is called (recipe, candidate); feeding the reversed
        // strings through must agree on the winning pair.
        let a = "16oz Plastic Cups";
        let b = "Plastic Cup 16oz";
        let s1 = score_pair(&normalize(a), &normalize(b)).score;
        let s2 = score_pair(&normalize(b), &normalize(a)).score;
        assert!((s1 - s2).abs() < 1e-9);
    }

    // --- resolve: refusals ---

    #[test]
    fn below_threshold_is_unmatched_with_evidence() {
        let inv = items(&["Bamboo Skewer"]);
        let err = resolve("Oreo Crushed", &inv, &ResolvePolicy::default()).unwrap_err();
        match err {
            ResolutionError::Unmatched {
                ingredient,
                best_score,
                best_candidate,
            } => {
                assert_eq!(ingredient, "Oreo Crushed");
                assert!(best_score < 0.6);
                assert_eq!(best_candidate.as_deref(), Some("Bamboo Skewer"));
            }
            other => panic!("expected Unmatched, got {other:?}"),
        }
    }

    #[test]
    fn empty_name_is_refused() {
        let inv = items(&["Milk"]);
        let err = resolve("  ", &inv, &ResolvePolicy::default()).unwrap_err();
        assert_eq!(err, ResolutionError::EmptyName);
    }

    #[test]
    fn empty_inventory_is_unmatched() {
        let err = resolve("Milk", &[], &ResolvePolicy::default()).unwrap_err();
        assert!(matches!(err, ResolutionError::Unmatched { .. }));
    }

    #[test]
    fn near_tied_distinct_items_are_ambiguous() {
        // Both are containment matches of the same shape; scores land equal.
        let inv = items(&["Mango Jam Jar", "Mango Jam Tub"]);
        let err = resolve("Mango Jam", &inv, &ResolvePolicy::default()).unwrap_err();
        match err {
            ResolutionError::Ambiguous {
                leader_score,
                runner_up_score,
                ..
            } => {
                assert!(leader_score - runner_up_score < AMBIGUITY_DELTA);
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn perfect_match_is_never_ambiguous() {
        // An exact 1.0 winner is not a guess; the ambiguity window only
        // applies to inexact leaders.
        let inv = items(&["Mango Jam", "Mango Jams Jar"]);
        let m = resolve("Mango Jam", &inv, &ResolvePolicy::default()).unwrap();
        assert_eq!(m.score, 1.0);
    }

    #[test]
    fn duplicate_rows_of_same_item_do_not_trip_ambiguity() {
        let id = Uuid::new_v4();
        let inv = vec![
            Candidate::new(id, "Mango Jam Jar"),
            Candidate::new(id, "Mango Jam Jar"),
        ];
        assert!(resolve("Mango Jam", &inv, &ResolvePolicy::default()).is_ok());
    }

    // --- policy thresholds ---

    #[test]
    fn mapping_policy_is_stricter_than_default() {
        // "Matcha" vs "Mocha" scores ~0.67: a plausible-looking but wrong
        // pairing. Ad-hoc lookup tolerates it (low tier); the persisted
        // mapping path must refuse it.
        let inv = items(&["Mocha"]);
        let loose = resolve("Matcha", &inv, &ResolvePolicy::default()).unwrap();
        assert_eq!(loose.tier, ConfidenceTier::Low);
        assert!(loose.score >= 0.6 && loose.score < MAPPING_THRESHOLD);

        let err = resolve("Matcha", &inv, &ResolvePolicy::mapping_build()).unwrap_err();
        assert!(matches!(err, ResolutionError::Unmatched { .. }));
    }

    // --- resolve_all ---

    #[test]
    fn resolve_all_is_all_or_nothing() {
        let inv = items(&[
            "Croffle Mix",
            "Whipped Cream",
            "Chocolate Syrup",
            "Popsicle Stick",
        ]);
        // Four resolvable plus one stranger: the whole set must fail.
        let err = resolve_all(
            &[
                "Croffle Mix",
                "Whip Cream",
                "Choco Syrup",
                "Popsicle Sticks",
                "Uranium Pellets",
            ],
            &inv,
            &ResolvePolicy::mapping_build(),
        )
        .unwrap_err();
        assert!(matches!(err, ResolutionError::Unmatched { .. }));

        // Without the stranger, all four resolve.
        let ok = resolve_all(
            &["Croffle Mix", "Whip Cream", "Choco Syrup", "Popsicle Sticks"],
            &inv,
            &ResolvePolicy::mapping_build(),
        )
        .unwrap();
        assert_eq!(ok.len(), 4);
    }

    #[test]
    fn resolution_is_deterministic() {
        let inv = items(&["Plastic Cup 16oz", "Plastic Cup 22oz", "Paper Cup 8oz"]);
        let a = resolve("16oz Plastic Cups", &inv, &ResolvePolicy::default()).unwrap();
        for _ in 0..10 {
            let b = resolve("16oz Plastic Cups", &inv, &ResolvePolicy::default()).unwrap();
            assert_eq!(a, b);
        }
    }
}
