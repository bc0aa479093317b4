//! Unit of work: transactional saves with outbox capture.
//!
//! A save stamps audit fields, checks the optimistic version, writes the
//! aggregate (and any new stock movements) together with one outbox row per
//! pending event, and commits. Only after the commit does the caller's
//! aggregate see the new audit fields and version, with its pending events
//! cleared. A failed save leaves both storage and aggregate unchanged.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

use stockroom_core::{LocationId, UserId};
use stockroom_inventory::{Inventory, InventoryId};
use stockroom_products::{Product, ProductId};

use crate::error::PersistenceError;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, PersistenceError>;

    async fn save_product(
        &self,
        product: &mut Product,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError>;

    /// Returns soft-deleted inventories too; callers decide what that means.
    async fn get_inventory(&self, id: InventoryId) -> Result<Option<Inventory>, PersistenceError>;

    /// The live (not deleted) inventory for a product at a location.
    async fn find_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Option<Inventory>, PersistenceError>;

    async fn save_inventory(
        &self,
        inventory: &mut Inventory,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<U> UnitOfWork for Arc<U>
where
    U: UnitOfWork + ?Sized,
{
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, PersistenceError> {
        (**self).get_product(id).await
    }

    async fn save_product(
        &self,
        product: &mut Product,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        (**self).save_product(product, actor).await
    }

    async fn get_inventory(&self, id: InventoryId) -> Result<Option<Inventory>, PersistenceError> {
        (**self).get_inventory(id).await
    }

    async fn find_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Option<Inventory>, PersistenceError> {
        (**self).find_inventory(product_id, location_id).await
    }

    async fn save_inventory(
        &self,
        inventory: &mut Inventory,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        (**self).save_inventory(inventory, actor).await
    }
}

/// A new aggregate (version 0) must not exist yet; a loaded one must still
/// be at the version it was loaded with.
fn check_version(
    kind: &str,
    id: impl core::fmt::Display,
    expected: u64,
    stored: Option<u64>,
) -> Result<(), PersistenceError> {
    match (expected, stored) {
        (0, None) => Ok(()),
        (expected, Some(actual)) if expected == actual => Ok(()),
        (expected, Some(actual)) => Err(PersistenceError::Concurrency(format!(
            "{kind} {id}: expected version {expected}, found {actual}"
        ))),
        (expected, None) => Err(PersistenceError::Concurrency(format!(
            "{kind} {id}: expected version {expected}, but it does not exist"
        ))),
    }
}
