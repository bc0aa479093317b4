//! Use-case services.
//!
//! Each call loads the aggregate, applies one domain operation, and saves it
//! through the unit of work with the acting user. Events raised by the
//! operation reach the outbox in the same save.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use stockroom_core::{Auditable, LocationId, UserId};
use stockroom_infra::UnitOfWork;
use stockroom_inventory::{Inventory, InventoryId, MovementType};
use stockroom_products::{Product, ProductId};

use crate::errors::AppError;

#[derive(Clone)]
pub struct ProductService {
    uow: Arc<dyn UnitOfWork>,
}

impl ProductService {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }

    #[instrument(skip(self, sku, name, actor), err)]
    pub async fn create(
        &self,
        sku: &str,
        name: &str,
        actor: Option<UserId>,
    ) -> Result<Product, AppError> {
        let mut product = Product::create(ProductId::generate(), sku, name, Utc::now())?;
        self.uow.save_product(&mut product, actor).await?;

        info!(product_id = %product.id_typed(), sku, "product created");
        Ok(product)
    }

    #[instrument(skip(self, actor), fields(product_id = %id), err)]
    pub async fn activate(&self, id: ProductId, actor: Option<UserId>) -> Result<Product, AppError> {
        let mut product = self.load(id).await?;
        product.activate(Utc::now())?;
        self.uow.save_product(&mut product, actor).await?;
        Ok(product)
    }

    #[instrument(skip(self, actor), fields(product_id = %id), err)]
    pub async fn archive(&self, id: ProductId, actor: Option<UserId>) -> Result<Product, AppError> {
        let mut product = self.load(id).await?;
        product.archive(Utc::now())?;
        self.uow.save_product(&mut product, actor).await?;
        Ok(product)
    }

    pub async fn get(&self, id: ProductId) -> Result<Product, AppError> {
        self.load(id).await
    }

    async fn load(&self, id: ProductId) -> Result<Product, AppError> {
        self.uow
            .get_product(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("product {id}")))
    }
}

/// Input for [`InventoryService::create_inventory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInventory {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity_on_hand: Decimal,
    pub reorder_level: Decimal,
    pub max_level: Decimal,
}

#[derive(Clone)]
pub struct InventoryService {
    uow: Arc<dyn UnitOfWork>,
}

impl InventoryService {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }

    #[instrument(
        skip(self, input, actor),
        fields(product_id = %input.product_id, location_id = %input.location_id),
        err
    )]
    pub async fn create_inventory(
        &self,
        input: NewInventory,
        actor: Option<UserId>,
    ) -> Result<Inventory, AppError> {
        let product = self
            .uow
            .get_product(input.product_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("product {}", input.product_id)))?;

        if self
            .uow
            .find_inventory(input.product_id, input.location_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "inventory for product {} at location {} already exists",
                input.product_id, input.location_id
            )));
        }

        let mut inventory = Inventory::create(
            InventoryId::generate(),
            &product,
            input.location_id,
            input.quantity_on_hand,
            input.reorder_level,
            input.max_level,
            Utc::now(),
        )?;
        self.uow.save_inventory(&mut inventory, actor).await?;

        info!(
            inventory_id = %inventory.id_typed(),
            quantity_on_hand = %inventory.quantity_on_hand(),
            "inventory created"
        );
        Ok(inventory)
    }

    /// Set the quantity on hand to an absolute value.
    #[instrument(skip(self, actor), fields(inventory_id = %id, quantity = %quantity), err)]
    pub async fn update_stock(
        &self,
        id: InventoryId,
        quantity: Decimal,
        actor: Option<UserId>,
    ) -> Result<Inventory, AppError> {
        let mut inventory = self.load(id).await?;
        inventory.update_stock(quantity, Utc::now())?;
        self.uow.save_inventory(&mut inventory, actor).await?;
        Ok(inventory)
    }

    /// Apply a signed change classified by `movement_type`, optionally with
    /// a free-text reason.
    #[instrument(
        skip(self, reason, actor),
        fields(inventory_id = %id, delta = %delta, movement_type = %movement_type),
        err
    )]
    pub async fn adjust_stock(
        &self,
        id: InventoryId,
        delta: Decimal,
        movement_type: MovementType,
        reason: Option<&str>,
        actor: Option<UserId>,
    ) -> Result<Inventory, AppError> {
        let mut inventory = self.load(id).await?;
        inventory.update_stock_by(delta, movement_type, reason, Utc::now())?;
        self.uow.save_inventory(&mut inventory, actor).await?;
        Ok(inventory)
    }

    #[instrument(skip(self, actor), fields(inventory_id = %id), err)]
    pub async fn update_inventory_levels(
        &self,
        id: InventoryId,
        quantity_on_hand: Decimal,
        reorder_level: Decimal,
        max_level: Decimal,
        actor: Option<UserId>,
    ) -> Result<Inventory, AppError> {
        let mut inventory = self.load(id).await?;
        inventory.update_inventory_levels(quantity_on_hand, reorder_level, max_level, Utc::now())?;
        self.uow.save_inventory(&mut inventory, actor).await?;
        Ok(inventory)
    }

    #[instrument(skip(self, actor), fields(inventory_id = %id), err)]
    pub async fn delete_inventory(
        &self,
        id: InventoryId,
        actor: Option<UserId>,
    ) -> Result<(), AppError> {
        let mut inventory = self.load(id).await?;
        inventory.delete()?;
        self.uow.save_inventory(&mut inventory, actor).await?;

        info!(inventory_id = %id, "inventory deleted");
        Ok(())
    }

    /// A deleted inventory reads as not found.
    pub async fn get_inventory(&self, id: InventoryId) -> Result<Inventory, AppError> {
        let inventory = self.load(id).await?;
        if inventory.is_deleted() {
            return Err(AppError::not_found(format!("inventory {id}")));
        }
        Ok(inventory)
    }

    // Deleted inventories load too, so mutations on them fail as conflicts.
    async fn load(&self, id: InventoryId) -> Result<Inventory, AppError> {
        self.uow
            .get_inventory(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("inventory {id}")))
    }
}
