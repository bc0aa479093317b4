use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    AggregateId, AggregateRoot, AuditInfo, Auditable, DomainError, LocationId, RaisesEvents,
};
use stockroom_products::{Product, ProductId};

use crate::low_stock::LowStockDomainEvent;
use crate::movement::{MovementType, StockMovement};

/// Inventory identifier (one per product/location pairing).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryId(pub AggregateId);

impl InventoryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for InventoryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for InventoryId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Persisted state of an inventory, used to rehydrate it from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity_on_hand: Decimal,
    pub reorder_level: Decimal,
    pub max_level: Decimal,
    pub deleted: bool,
    pub audit: AuditInfo,
    pub version: u64,
    pub movements: Vec<StockMovement>,
}

/// Aggregate root: Inventory.
///
/// Invariants:
/// - `0 <= quantity_on_hand <= max_level`
/// - `reorder_level <= max_level`
/// - soft-deleted only while empty; deleted inventories reject every mutation
///
/// Every operation validates before it mutates, so a failed call leaves the
/// aggregate exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inventory {
    id: InventoryId,
    product_id: ProductId,
    location_id: LocationId,
    quantity_on_hand: Decimal,
    reorder_level: Decimal,
    max_level: Decimal,
    deleted: bool,
    audit: AuditInfo,
    version: u64,
    movements: Vec<StockMovement>,
    saved_movements: usize,
    pending: Vec<LowStockDomainEvent>,
}

impl Inventory {
    /// Open inventory for an active product at a location.
    ///
    /// Records the initial quantity as a completed `InitialStock` movement.
    pub fn create(
        id: InventoryId,
        product: &Product,
        location_id: LocationId,
        quantity_on_hand: Decimal,
        reorder_level: Decimal,
        max_level: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !product.is_active() {
            return Err(DomainError::invariant(
                "inventory can only be created for an active product",
            ));
        }

        validate_levels(quantity_on_hand, reorder_level, max_level)?;

        Ok(Self {
            id,
            product_id: product.id_typed(),
            location_id,
            quantity_on_hand,
            reorder_level,
            max_level,
            deleted: false,
            audit: AuditInfo::default(),
            version: 0,
            movements: vec![StockMovement::completed(
                MovementType::InitialStock,
                quantity_on_hand,
                occurred_at,
            )],
            saved_movements: 0,
            pending: Vec::new(),
        })
    }

    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        let saved_movements = snapshot.movements.len();
        Self {
            id: snapshot.id,
            product_id: snapshot.product_id,
            location_id: snapshot.location_id,
            quantity_on_hand: snapshot.quantity_on_hand,
            reorder_level: snapshot.reorder_level,
            max_level: snapshot.max_level,
            deleted: snapshot.deleted,
            audit: snapshot.audit,
            version: snapshot.version,
            movements: snapshot.movements,
            saved_movements,
            pending: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            id: self.id,
            product_id: self.product_id,
            location_id: self.location_id,
            quantity_on_hand: self.quantity_on_hand,
            reorder_level: self.reorder_level,
            max_level: self.max_level,
            deleted: self.deleted,
            audit: self.audit.clone(),
            version: self.version,
            movements: self.movements.clone(),
        }
    }

    pub fn id_typed(&self) -> InventoryId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn quantity_on_hand(&self) -> Decimal {
        self.quantity_on_hand
    }

    pub fn reorder_level(&self) -> Decimal {
        self.reorder_level
    }

    pub fn max_level(&self) -> Decimal {
        self.max_level
    }

    pub fn is_low_stock(&self) -> bool {
        self.quantity_on_hand < self.reorder_level
    }

    pub fn movements(&self) -> &[StockMovement] {
        &self.movements
    }

    /// Movements appended since the last successful save.
    pub fn unsaved_movements(&self) -> &[StockMovement] {
        &self.movements[self.saved_movements..]
    }

    /// Called by the unit of work once the movements are committed.
    pub fn mark_movements_saved(&mut self) {
        self.saved_movements = self.movements.len();
    }

    /// Set the quantity on hand to an absolute value.
    ///
    /// Appends one adjustment movement for the difference (none when the
    /// quantity does not change) and raises a low-stock event whenever the
    /// result is below the reorder level.
    pub fn update_stock(
        &mut self,
        new_quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_not_deleted()?;

        if new_quantity < Decimal::ZERO {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if new_quantity > self.max_level {
            return Err(DomainError::validation(format!(
                "quantity {new_quantity} exceeds max level {}",
                self.max_level
            )));
        }

        self.apply_quantity(new_quantity, occurred_at);
        self.check_low_stock(occurred_at);
        Ok(())
    }

    /// Change the quantity on hand by a signed delta.
    ///
    /// The movement is tagged with the caller's `movement_type`, carries the
    /// delta as given, and records `reason` (or the type's default reason).
    pub fn update_stock_by(
        &mut self,
        quantity: Decimal,
        movement_type: MovementType,
        reason: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_not_deleted()?;

        if quantity.is_zero() {
            return Err(DomainError::validation("stock change cannot be zero"));
        }
        if movement_type == MovementType::InitialStock {
            return Err(DomainError::validation(
                "initial stock is only recorded when inventory is created",
            ));
        }

        let result = self.quantity_on_hand + quantity;
        if result < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "insufficient stock: {} on hand, change of {quantity}",
                self.quantity_on_hand
            )));
        }
        if result > self.max_level {
            return Err(DomainError::validation(format!(
                "quantity {result} exceeds max level {}",
                self.max_level
            )));
        }

        self.movements.push(
            StockMovement::completed(movement_type, quantity, occurred_at).with_reason(reason),
        );
        self.quantity_on_hand = result;
        self.check_low_stock(occurred_at);
        Ok(())
    }

    /// Replace quantity, reorder level, and max level together.
    ///
    /// The three values are validated against each other first. The quantity
    /// then goes through `update_stock`, so it is bounded by the current max
    /// level and checked against the current reorder level. The new levels
    /// are assigned last.
    pub fn update_inventory_levels(
        &mut self,
        quantity_on_hand: Decimal,
        reorder_level: Decimal,
        max_level: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_not_deleted()?;
        validate_levels(quantity_on_hand, reorder_level, max_level)?;

        self.update_stock(quantity_on_hand, occurred_at)?;
        self.reorder_level = reorder_level;
        self.max_level = max_level;
        Ok(())
    }

    /// Soft-delete an empty inventory.
    pub fn delete(&mut self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::conflict("inventory is already deleted"));
        }
        if !self.quantity_on_hand.is_zero() {
            return Err(DomainError::conflict(format!(
                "inventory still holds {} units",
                self.quantity_on_hand
            )));
        }

        self.deleted = true;
        Ok(())
    }

    fn ensure_not_deleted(&self) -> Result<(), DomainError> {
        if self.deleted {
            return Err(DomainError::conflict("inventory is deleted"));
        }
        Ok(())
    }

    fn apply_quantity(&mut self, new_quantity: Decimal, occurred_at: DateTime<Utc>) {
        let delta = new_quantity - self.quantity_on_hand;
        if delta > Decimal::ZERO {
            self.movements.push(StockMovement::completed(
                MovementType::AdjustmentIncrease,
                delta,
                occurred_at,
            ));
        } else if delta < Decimal::ZERO {
            self.movements.push(StockMovement::completed(
                MovementType::AdjustmentDecrease,
                delta,
                occurred_at,
            ));
        }
        self.quantity_on_hand = new_quantity;
    }

    fn check_low_stock(&mut self, occurred_at: DateTime<Utc>) {
        if self.is_low_stock() {
            self.pending.push(LowStockDomainEvent::new(
                self.product_id,
                self.location_id,
                self.quantity_on_hand,
                occurred_at,
            ));
        }
    }
}

fn validate_levels(
    quantity_on_hand: Decimal,
    reorder_level: Decimal,
    max_level: Decimal,
) -> Result<(), DomainError> {
    if quantity_on_hand < Decimal::ZERO {
        return Err(DomainError::validation("quantity on hand cannot be negative"));
    }
    if reorder_level < Decimal::ZERO {
        return Err(DomainError::validation("reorder level cannot be negative"));
    }
    if max_level < quantity_on_hand {
        return Err(DomainError::validation(
            "max level must be at least the quantity on hand",
        ));
    }
    if max_level < reorder_level {
        return Err(DomainError::validation(
            "max level must be at least the reorder level",
        ));
    }
    Ok(())
}

impl AggregateRoot for Inventory {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl RaisesEvents for Inventory {
    type Event = LowStockDomainEvent;

    fn pending_events(&self) -> &[Self::Event] {
        &self.pending
    }

    fn clear_events(&mut self) {
        self.pending.clear();
    }
}

impl Auditable for Inventory {
    fn audit(&self) -> &AuditInfo {
        &self.audit
    }

    fn audit_mut(&mut self) -> &mut AuditInfo {
        &mut self.audit
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}
