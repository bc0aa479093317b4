use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use stockroom_core::{LocationId, UserId};
use stockroom_inventory::{Inventory, InventoryId, InventorySnapshot};
use stockroom_products::{Product, ProductId, ProductSnapshot};

use super::{UnitOfWork, check_version};
use crate::error::PersistenceError;
use crate::outbox::capture::Staged;
use crate::outbox::{OutboxMessage, OutboxStore};

#[derive(Debug, Default)]
struct State {
    products: HashMap<ProductId, ProductSnapshot>,
    inventories: HashMap<InventoryId, InventorySnapshot>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory unit of work and outbox.
///
/// Intended for tests/dev. One lock guards all tables, so a save is atomic
/// the same way a database transaction is.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, PersistenceError> {
        self.state
            .read()
            .map_err(|_| PersistenceError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, PersistenceError> {
        self.state
            .write()
            .map_err(|_| PersistenceError::Storage("lock poisoned".to_string()))
    }

    /// Every outbox row in insertion order.
    pub fn outbox_messages(&self) -> Result<Vec<OutboxMessage>, PersistenceError> {
        Ok(self.read()?.outbox.clone())
    }

    /// Insert a row directly, bypassing capture (seeding and repair).
    pub fn insert_outbox_message(&self, message: OutboxMessage) -> Result<(), PersistenceError> {
        let mut state = self.write()?;
        if state.outbox.iter().any(|m| m.id == message.id) {
            return Err(PersistenceError::Concurrency(format!(
                "outbox message {} already exists",
                message.id
            )));
        }
        state.outbox.push(message);
        Ok(())
    }

    fn ordered(mut rows: Vec<OutboxMessage>, limit: usize) -> Vec<OutboxMessage> {
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit);
        rows
    }
}

#[async_trait]
impl UnitOfWork for InMemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, PersistenceError> {
        let state = self.read()?;
        Ok(state.products.get(&id).cloned().map(Product::from_snapshot))
    }

    async fn save_product(
        &self,
        product: &mut Product,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        let staged = Staged::prepare(product, actor, Utc::now())?;
        let id = product.id_typed();

        {
            let mut state = self.write()?;
            let stored = state.products.get(&id).map(|p| p.version);
            check_version("product", id, staged.expected_version, stored)?;

            let mut snapshot = staged.aggregate.snapshot();
            snapshot.version = staged.next_version();
            state.products.insert(id, snapshot);
            state.outbox.extend(staged.messages.iter().cloned());
        }

        debug!(product_id = %id, events = staged.messages.len(), "product saved");
        staged.commit_into(product);
        Ok(())
    }

    async fn get_inventory(&self, id: InventoryId) -> Result<Option<Inventory>, PersistenceError> {
        let state = self.read()?;
        Ok(state.inventories.get(&id).cloned().map(Inventory::from_snapshot))
    }

    async fn find_inventory(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Option<Inventory>, PersistenceError> {
        let state = self.read()?;
        Ok(state
            .inventories
            .values()
            .find(|i| i.product_id == product_id && i.location_id == location_id && !i.deleted)
            .cloned()
            .map(Inventory::from_snapshot))
    }

    async fn save_inventory(
        &self,
        inventory: &mut Inventory,
        actor: Option<UserId>,
    ) -> Result<(), PersistenceError> {
        let staged = Staged::prepare(inventory, actor, Utc::now())?;
        let id = inventory.id_typed();

        {
            let mut state = self.write()?;
            let stored = state.inventories.get(&id).map(|i| i.version);
            check_version("inventory", id, staged.expected_version, stored)?;

            let snapshot = staged.aggregate.snapshot();
            if !state.products.contains_key(&snapshot.product_id) {
                return Err(PersistenceError::NotFound(format!(
                    "product {}",
                    snapshot.product_id
                )));
            }
            let duplicate = state.inventories.values().any(|other| {
                other.id != id
                    && !other.deleted
                    && !snapshot.deleted
                    && other.product_id == snapshot.product_id
                    && other.location_id == snapshot.location_id
            });
            if duplicate {
                return Err(PersistenceError::Concurrency(format!(
                    "product {} already has inventory at location {}",
                    snapshot.product_id, snapshot.location_id
                )));
            }

            let snapshot = InventorySnapshot {
                version: staged.next_version(),
                ..snapshot
            };
            state.inventories.insert(id, snapshot);
            state.outbox.extend(staged.messages.iter().cloned());
        }

        debug!(
            inventory_id = %id,
            movements = inventory.unsaved_movements().len(),
            events = staged.messages.len(),
            "inventory saved"
        );
        staged.commit_into(inventory);
        inventory.mark_movements_saved();
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let state = self.read()?;
        let rows = state
            .outbox
            .iter()
            .filter(|m| m.processed_at.is_none() && m.attempts < max_attempts)
            .cloned()
            .collect();
        Ok(Self::ordered(rows, limit))
    }

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let mut state = self.write()?;
        let row = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| PersistenceError::NotFound(format!("outbox message {id}")))?;
        row.processed_at = Some(at);
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        attempts: u32,
    ) -> Result<(), PersistenceError> {
        let mut state = self.write()?;
        let row = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| PersistenceError::NotFound(format!("outbox message {id}")))?;
        row.error = Some(error.to_string());
        row.attempts = attempts;
        Ok(())
    }

    async fn dead_letters(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        let state = self.read()?;
        let rows = state
            .outbox
            .iter()
            .filter(|m| m.is_dead_letter(max_attempts))
            .cloned()
            .collect();
        Ok(Self::ordered(rows, limit))
    }
}
