//! The standing cafe dataset most scenarios run against.
//!
//! Three products over three items:
//! - Latte: 250ml Whole Milk + 18g Espresso Beans
//! - Americano: 18g Espresso Beans
//! - Croffle: 80g Croffle Mix
//!
//! Stock on hand: 2000ml milk, 500g beans, 400g mix. Quantities are
//! milliunits end to end.

use std::sync::Arc;

use uuid::Uuid;

use stk_ledger::MemoryStockStore;
use stk_schemas::{DeductionRequest, IngredientMapping, RecipeComponent, SaleLine};

use crate::fakes::{FixedCatalog, FixedMappings};

pub const MILK_START_MILLI: i64 = 2_000_000;
pub const BEANS_START_MILLI: i64 = 500_000;
pub const MIX_START_MILLI: i64 = 400_000;

pub struct CafeFixture {
    pub store_id: Uuid,
    pub latte: Uuid,
    pub americano: Uuid,
    pub croffle: Uuid,
    pub milk: Uuid,
    pub beans: Uuid,
    pub croffle_mix: Uuid,
    pub stock: Arc<MemoryStockStore>,
}

impl CafeFixture {
    pub fn new() -> Self {
        let store_id = Uuid::new_v4();
        let fixture = Self {
            store_id,
            latte: Uuid::new_v4(),
            americano: Uuid::new_v4(),
            croffle: Uuid::new_v4(),
            milk: Uuid::new_v4(),
            beans: Uuid::new_v4(),
            croffle_mix: Uuid::new_v4(),
            stock: Arc::new(MemoryStockStore::new()),
        };
        fixture
            .stock
            .seed(store_id, fixture.milk, "Whole Milk", "ml", MILK_START_MILLI);
        fixture
            .stock
            .seed(store_id, fixture.beans, "Espresso Beans", "g", BEANS_START_MILLI);
        fixture
            .stock
            .seed(store_id, fixture.croffle_mix, "Croffle Mix", "g", MIX_START_MILLI);
        fixture
    }

    pub fn catalog(&self) -> FixedCatalog {
        let mut catalog = FixedCatalog::new();
        catalog.insert(
            self.latte,
            vec![
                component("Whole Milk", 250_000, "ml"),
                component("Espresso Beans", 18_000, "g"),
            ],
        );
        catalog.insert(self.americano, vec![component("Espresso Beans", 18_000, "g")]);
        catalog.insert(self.croffle, vec![component("Croffle Mix", 80_000, "g")]);
        catalog
    }

    pub fn mappings(&self) -> FixedMappings {
        FixedMappings::new(vec![
            self.map_row(self.latte, "Whole Milk", self.milk, "ml"),
            self.map_row(self.latte, "Espresso Beans", self.beans, "g"),
            self.map_row(self.americano, "Espresso Beans", self.beans, "g"),
            self.map_row(self.croffle, "Croffle Mix", self.croffle_mix, "g"),
        ])
    }

    pub fn map_row(
        &self,
        product_id: Uuid,
        ingredient: &str,
        item_id: Uuid,
        unit: &str,
    ) -> IngredientMapping {
        IngredientMapping {
            store_id: self.store_id,
            product_id,
            ingredient_name: ingredient.to_string(),
            item_id,
            unit: unit.to_string(),
        }
    }

    pub fn sale(&self, lines: Vec<SaleLine>) -> DeductionRequest {
        DeductionRequest {
            sale_id: Uuid::new_v4(),
            store_id: self.store_id,
            lines,
        }
    }

    pub fn qty_of(&self, item_id: Uuid) -> i64 {
        self.stock
            .levels_snapshot()
            .into_iter()
            .find(|l| l.item_id == item_id)
            .map(|l| l.qty_milli)
            .unwrap_or(i64::MIN)
    }

    /// Sum of every level in the store, for conservation assertions.
    pub fn total_stock_milli(&self) -> i64 {
        self.stock
            .levels_snapshot()
            .iter()
            .map(|l| l.qty_milli)
            .sum()
    }
}

impl Default for CafeFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn component(name: &str, qty_milli: i64, unit: &str) -> RecipeComponent {
    RecipeComponent {
        ingredient_name: name.to_string(),
        qty_milli,
        unit: unit.to_string(),
    }
}

pub fn sale_line(product_id: Uuid, name: &str, quantity: u32) -> SaleLine {
    SaleLine {
        product_id,
        product_name: name.to_string(),
        quantity,
    }
}
