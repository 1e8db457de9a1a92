//! Pure planning: fold sale lines into per-item needs, then check those
//! needs against the stock levels that were read. No I/O here; the
//! coordinator feeds this and acts on the result.

use std::collections::BTreeMap;

use uuid::Uuid;

use stk_ledger::StockLevel;
use stk_schemas::{IngredientMapping, RecipeComponent, SaleLine};

use crate::errors::DeductionError;

/// Total requirement for one inventory item across the whole sale.
#[derive(Debug, Clone)]
pub struct ItemNeed {
    pub item_id: Uuid,
    pub need_milli: i64,
    /// Ingredient names that contributed, for error messages.
    pub labels: Vec<String>,
}

/// One CAS the coordinator intends to issue, pinned to the level (and
/// version) that passed the sufficiency check.
#[derive(Debug, Clone)]
pub struct PlannedCas {
    pub level: StockLevel,
    pub need_milli: i64,
}

#[derive(Debug, Default)]
pub struct SufficiencyCheck {
    pub planned: Vec<PlannedCas>,
    pub vanished: Vec<DeductionError>,
    pub shortfalls: Vec<DeductionError>,
}

/// Aggregate `(line, recipe)` pairs into needs keyed by inventory item.
///
/// A line whose recipe has any unmapped ingredient contributes nothing:
/// deducting half a recipe would drift stock against actual consumption.
/// Such lines produce one error per missing ingredient and the rest of the
/// sale carries on.
pub fn aggregate_needs(
    lines: &[(SaleLine, Vec<RecipeComponent>)],
    mappings: &[IngredientMapping],
) -> (BTreeMap<Uuid, ItemNeed>, Vec<DeductionError>) {
    let index: BTreeMap<(Uuid, String), &IngredientMapping> = mappings
        .iter()
        .map(|m| ((m.product_id, mapping_key(&m.ingredient_name)), m))
        .collect();

    let mut needs: BTreeMap<Uuid, ItemNeed> = BTreeMap::new();
    let mut errors = Vec::new();

    for (line, recipe) in lines {
        if line.quantity == 0 {
            continue;
        }
        let mut resolved: Vec<(Uuid, i64, &str)> = Vec::with_capacity(recipe.len());
        let mut line_ok = true;
        for component in recipe {
            let key = (line.product_id, mapping_key(&component.ingredient_name));
            let Some(mapping) = index.get(&key) else {
                errors.push(DeductionError::MappingIncomplete {
                    product_id: line.product_id,
                    product: line.product_name.clone(),
                    ingredient: component.ingredient_name.clone(),
                });
                line_ok = false;
                continue;
            };
            match component.qty_milli.checked_mul(i64::from(line.quantity)) {
                Some(need) if need > 0 => {
                    resolved.push((mapping.item_id, need, component.ingredient_name.as_str()));
                }
                Some(_) => {} // zero-quantity component, nothing to deduct
                None => {
                    errors.push(DeductionError::System {
                        detail: format!(
                            "quantity overflow for '{}' x{}",
                            component.ingredient_name, line.quantity
                        ),
                    });
                    line_ok = false;
                }
            }
        }
        if !line_ok {
            continue;
        }
        for (item_id, need, ingredient) in resolved {
            let entry = needs.entry(item_id).or_insert_with(|| ItemNeed {
                item_id,
                need_milli: 0,
                labels: Vec::new(),
            });
            // Saturation only matters after checked_mul already passed; a
            // saturated total simply fails the sufficiency check.
            entry.need_milli = entry.need_milli.saturating_add(need);
            if !entry.labels.iter().any(|l| l == ingredient) {
                entry.labels.push(ingredient.to_string());
            }
        }
    }

    (needs, errors)
}

/// Split needs into plannable writes, vanished items, and shortfalls.
/// `levels` holds only the rows that were found active; anything needed but
/// absent is vanished. Exact equality of stock and need passes.
pub fn check_sufficiency(
    needs: &BTreeMap<Uuid, ItemNeed>,
    levels: &BTreeMap<Uuid, StockLevel>,
) -> SufficiencyCheck {
    let mut out = SufficiencyCheck::default();
    for (item_id, need) in needs {
        match levels.get(item_id) {
            None => out
                .vanished
                .push(DeductionError::ItemVanished { item_id: *item_id }),
            Some(level) if level.qty_milli < need.need_milli => {
                out.shortfalls.push(DeductionError::InsufficientStock {
                    item_id: *item_id,
                    name: level.name.clone(),
                    have_milli: level.qty_milli,
                    need_milli: need.need_milli,
                });
            }
            Some(level) => out.planned.push(PlannedCas {
                level: level.clone(),
                need_milli: need.need_milli,
            }),
        }
    }
    out
}

fn mapping_key(ingredient: &str) -> String {
    ingredient.trim().to_lowercase()
}
