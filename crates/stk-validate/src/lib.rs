//! stk-validate
//!
//! Mapping Validator: advisory pre-flight for a product's deduction mapping.
//! - Completeness (every recipe ingredient mapped to a live item): errors
//! - Unit-family compatibility, quantity plausibility, current stock
//!   sufficiency, product-archetype consumables: warnings
//! - Score: 100 − 25×errors − 5×warnings, floored at 0
//!
//! Pure deterministic logic. The validator never mutates stock and never
//! blocks a deduction by itself; the ledger's compare-and-set is the final
//! authority on sufficiency.

mod units;

pub use units::{compatible, plausible_range_milli, unit_family, UnitFamily};

use serde::{Deserialize, Serialize};
use stk_resolver::normalize;
use stk_schemas::{IngredientMapping, RecipeComponent};
use uuid::Uuid;

pub const ERROR_PENALTY: i64 = 25;
pub const WARNING_PENALTY: i64 = 5;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The slice of a store's active inventory the validator compares against.
/// Callers must pre-filter to active rows; inactive items are invisible here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryView {
    pub item_id: Uuid,
    pub name: String,
    pub unit: String,
    pub qty_milli: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingUnderReview {
    pub product_name: String,
    pub requirements: Vec<RecipeComponent>,
    pub mappings: Vec<IngredientMapping>,
    pub inventory: Vec<InventoryView>,
}

// ---------------------------------------------------------------------------
// Issues and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    MissingMapping,
    UnknownItem,
    UnitMismatch,
    ImplausibleQuantity,
    InsufficientStock,
    MissingConsumable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: IssueCode,
    pub ingredient: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub product_name: String,
    pub issues: Vec<ValidationIssue>,
    pub score: u8,
    pub valid: bool,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }
}

fn score_from_counts(errors: usize, warnings: usize) -> u8 {
    let raw = 100_i64 - ERROR_PENALTY * errors as i64 - WARNING_PENALTY * warnings as i64;
    raw.clamp(0, 100) as u8
}

// ---------------------------------------------------------------------------
// Archetype expectations
// ---------------------------------------------------------------------------

/// Product archetypes and the consumable keywords their mappings are
/// expected to include somewhere. Purely heuristic; misses warn, never fail.
const ARCHETYPES: &[(&[&str], &[&str], &str)] = &[
    (
        &["croffle", "waffle", "pastry"],
        &["box", "bag", "stick", "popsicle", "packaging", "takeout", "wrapper"],
        "packaging or stick",
    ),
    (
        &["blended", "iced", "smoothie", "frappe", "shake", "cold"],
        &["cup", "lid", "straw", "glass", "container"],
        "cup, lid or straw",
    ),
    (
        &["hot", "latte", "americano", "cappuccino"],
        &["cup", "lid", "sleeve"],
        "hot cup or lid",
    ),
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Run all checks over one product's mapping. Deterministic: issue order
/// follows requirement order, then the archetype table order.
pub fn validate_mapping(input: &MappingUnderReview) -> ValidationReport {
    let mut issues: Vec<ValidationIssue> = Vec::new();

    for req in &input.requirements {
        let req_key = normalize(&req.ingredient_name).joined;
        let mapping = input
            .mappings
            .iter()
            .find(|m| normalize(&m.ingredient_name).joined == req_key);

        let Some(mapping) = mapping else {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                code: IssueCode::MissingMapping,
                ingredient: Some(req.ingredient_name.clone()),
                message: format!("'{}' has no deduction mapping", req.ingredient_name),
            });
            continue;
        };

        let Some(item) = input
            .inventory
            .iter()
            .find(|i| i.item_id == mapping.item_id)
        else {
            issues.push(ValidationIssue {
                severity: Severity::Error,
                code: IssueCode::UnknownItem,
                ingredient: Some(req.ingredient_name.clone()),
                message: format!(
                    "'{}' maps to item {} which is not in the active inventory",
                    req.ingredient_name, mapping.item_id
                ),
            });
            continue;
        };

        if !compatible(&req.unit, &item.unit) {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: IssueCode::UnitMismatch,
                ingredient: Some(req.ingredient_name.clone()),
                message: format!(
                    "'{}' is specified in {} but '{}' is stocked in {}",
                    req.ingredient_name, req.unit, item.name, item.unit
                ),
            });
        }

        if let Some(family) = unit_family(&req.unit) {
            let (lo, hi) = plausible_range_milli(family);
            if req.qty_milli < lo || req.qty_milli > hi {
                issues.push(ValidationIssue {
                    severity: Severity::Warning,
                    code: IssueCode::ImplausibleQuantity,
                    ingredient: Some(req.ingredient_name.clone()),
                    message: format!(
                        "'{}' uses {} milli-{} per sale, outside the plausible window [{lo}, {hi}]",
                        req.ingredient_name, req.qty_milli, req.unit
                    ),
                });
            }
        }

        if item.qty_milli < req.qty_milli {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: IssueCode::InsufficientStock,
                ingredient: Some(req.ingredient_name.clone()),
                message: format!(
                    "'{}' needs {} milli per sale but '{}' has only {}",
                    req.ingredient_name, req.qty_milli, item.name, item.qty_milli
                ),
            });
        }
    }

    // Archetype pass: product keywords imply expected consumables among the
    // mapped item names.
    let product_tokens = normalize(&input.product_name).tokens;
    let mapped_item_names: Vec<String> = input
        .mappings
        .iter()
        .filter_map(|m| {
            input
                .inventory
                .iter()
                .find(|i| i.item_id == m.item_id)
                .map(|i| normalize(&i.name).joined)
        })
        .collect();

    for (product_keys, expected_keys, label) in ARCHETYPES {
        let product_hits = product_keys
            .iter()
            .any(|k| product_tokens.iter().any(|t| t == k));
        if !product_hits {
            continue;
        }
        let satisfied = expected_keys.iter().any(|k| {
            mapped_item_names
                .iter()
                .any(|name| name.split(' ').any(|tok| stk_resolver::trim_plural(tok) == *k))
        });
        if !satisfied {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                code: IssueCode::MissingConsumable,
                ingredient: None,
                message: format!(
                    "'{}' products usually consume a {label}; none is mapped",
                    input.product_name
                ),
            });
        }
    }

    let errors = issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .count();
    let warnings = issues.len() - errors;

    ValidationReport {
        product_name: input.product_name.clone(),
        score: score_from_counts(errors, warnings),
        valid: errors == 0,
        issues,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
