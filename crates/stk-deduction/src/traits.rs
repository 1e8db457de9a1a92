//! Storage seams the coordinator works through. Each one has a Postgres
//! implementation in `stk-db` and in-memory fakes in `stk-testkit`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stk_schemas::{IngredientMapping, RecipeComponent};

use crate::errors::SystemFault;

/// Recipe source: what one unit of a product consumes.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn recipe_for_product(
        &self,
        store_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Vec<RecipeComponent>>, SystemFault>;
}

/// Persisted ingredient-to-item links, read in bulk per store.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn mappings_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<IngredientMapping>, SystemFault>;
}

/// Marker proving a sale already deducted in full. Written once, after the
/// write fan-out; its presence turns replays into no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub sale_id: Uuid,
    pub store_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub items_deducted: u32,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, sale_id: Uuid) -> Result<Option<IdempotencyRecord>, SystemFault>;

    /// Must tolerate a duplicate write for the same sale; the first record
    /// wins.
    async fn record(&self, record: IdempotencyRecord) -> Result<(), SystemFault>;
}

// Arc delegation so the daemon can hand the coordinator shared `Arc<dyn ...>`
// collaborators.

#[async_trait]
impl<T: CatalogStore + ?Sized> CatalogStore for Arc<T> {
    async fn recipe_for_product(
        &self,
        store_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<Vec<RecipeComponent>>, SystemFault> {
        (**self).recipe_for_product(store_id, product_id).await
    }
}

#[async_trait]
impl<T: MappingStore + ?Sized> MappingStore for Arc<T> {
    async fn mappings_for_store(
        &self,
        store_id: Uuid,
    ) -> Result<Vec<IngredientMapping>, SystemFault> {
        (**self).mappings_for_store(store_id).await
    }
}

#[async_trait]
impl<T: IdempotencyStore + ?Sized> IdempotencyStore for Arc<T> {
    async fn lookup(&self, sale_id: Uuid) -> Result<Option<IdempotencyRecord>, SystemFault> {
        (**self).lookup(sale_id).await
    }

    async fn record(&self, record: IdempotencyRecord) -> Result<(), SystemFault> {
        (**self).record(record).await
    }
}
