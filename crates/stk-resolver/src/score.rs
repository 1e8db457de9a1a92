//! Similarity scoring between a normalized recipe name and a normalized
//! inventory name. Scores live in [0.0, 1.0]; the rule ladder is ordered so
//! the first match wins:
//!
//! 1. exact (equal sorted token lists)           -> 1.0
//! 2. full-name synonym set membership           -> 0.9
//! 3. containment (token subset / substring)     -> 0.8 ..= 0.9
//! 4. averaged per-token similarity (Levenshtein)-> 0.0 ..  1.0

use crate::normalize::{trim_plural, Normalized};
use crate::synonyms::same_synonym_set;

pub const EXACT_SCORE: f64 = 1.0;
pub const SYNONYM_SCORE: f64 = 0.9;
pub const CONTAINMENT_BASE: f64 = 0.8;
/// Per-token similarity granted to synonym-set token pairs inside the
/// fuzzy average.
const TOKEN_SYNONYM_SCORE: f64 = 0.9;
/// Token pairs below this similarity contribute nothing to the average.
/// Without the floor, one shared anchor token ("oreo") drags unrelated
/// names ("Oreo Cookies" vs "Oreo Crushed") above the acceptance threshold.
const TOKEN_SIM_FLOOR: f64 = 0.5;

/// How a score was produced. Rank order breaks score ties when selecting
/// among candidates: exact > containment > synonym > fuzzy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Containment,
    Synonym,
    Fuzzy,
}

impl MatchMethod {
    pub fn rank(&self) -> u8 {
        match self {
            MatchMethod::Exact => 3,
            MatchMethod::Containment => 2,
            MatchMethod::Synonym => 1,
            MatchMethod::Fuzzy => 0,
        }
    }
}

/// Score plus the evidence needed for deterministic tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairScore {
    pub score: f64,
    pub method: MatchMethod,
    /// Total raw edit distance across matched tokens; lower wins ties.
    pub distance: usize,
}

/// Classic two-row Levenshtein over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr: Vec<usize> = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let sub_cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j] + sub_cost)
                .min(prev[j + 1] + 1)
                .min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity of one token pair: equality after plural trim is 1.0, synonym
/// pairs get a fixed 0.9, everything else is normalized edit distance.
/// Returns (similarity, raw_distance).
fn token_similarity(a: &str, b: &str) -> (f64, usize) {
    let ta = trim_plural(a);
    let tb = trim_plural(b);
    if ta == tb {
        return (1.0, levenshtein(a, b));
    }
    if same_synonym_set(a, b) || same_synonym_set(ta, tb) {
        return (TOKEN_SYNONYM_SCORE, levenshtein(a, b));
    }
    let dist = levenshtein(ta, tb);
    let max_len = ta.chars().count().max(tb.chars().count());
    if max_len == 0 {
        return (0.0, 0);
    }
    ((max_len - dist.min(max_len)) as f64 / max_len as f64, dist)
}

/// True when every token of `inner` matches some token of `outer` after
/// plural trimming.
fn token_subset(inner: &Normalized, outer: &Normalized) -> bool {
    inner.tokens.iter().all(|it| {
        outer
            .tokens
            .iter()
            .any(|ot| trim_plural(it) == trim_plural(ot))
    })
}

/// Score a normalized pair through the rule ladder.
pub fn score_pair(recipe: &Normalized, candidate: &Normalized) -> PairScore {
    if recipe.is_empty() || candidate.is_empty() {
        return PairScore {
            score: 0.0,
            method: MatchMethod::Fuzzy,
            distance: usize::MAX,
        };
    }

    // 1. exact: same token multiset.
    if recipe.tokens == candidate.tokens {
        return PairScore {
            score: EXACT_SCORE,
            method: MatchMethod::Exact,
            distance: 0,
        };
    }

    // 2. whole-name synonym set.
    if same_synonym_set(&recipe.joined, &candidate.joined) {
        return PairScore {
            score: SYNONYM_SCORE,
            method: MatchMethod::Synonym,
            distance: 0,
        };
    }

    // 3. containment: token subset either way, or substring on the joined
    //    form (catches single-token names embedded in compound ones).
    let subset = token_subset(recipe, candidate) || token_subset(candidate, recipe);
    let substring =
        recipe.joined.contains(&candidate.joined) || candidate.joined.contains(&recipe.joined);
    if subset || substring {
        let shorter = recipe.tokens.len().min(candidate.tokens.len()) as f64;
        let longer = recipe.tokens.len().max(candidate.tokens.len()) as f64;
        return PairScore {
            score: CONTAINMENT_BASE + 0.1 * (shorter / longer),
            method: MatchMethod::Containment,
            distance: 0,
        };
    }

    // 4. averaged best-token similarity, driven from the shorter side so a
    //    long inventory name cannot dilute a strong partial match.
    let (short, long) = if recipe.tokens.len() <= candidate.tokens.len() {
        (recipe, candidate)
    } else {
        (candidate, recipe)
    };
    let mut total = 0.0;
    let mut total_dist = 0usize;
    for st in &short.tokens {
        let mut best = 0.0f64;
        let mut best_dist = usize::MAX;
        for lt in &long.tokens {
            let (sim, dist) = token_similarity(st, lt);
            if sim > best || (sim == best && dist < best_dist) {
                best = sim;
                best_dist = dist;
            }
        }
        if best >= TOKEN_SIM_FLOOR {
            total += best;
        }
        total_dist = total_dist.saturating_add(best_dist);
    }
    PairScore {
        score: total / short.tokens.len() as f64,
        method: MatchMethod::Fuzzy,
        distance: total_dist,
    }
}
