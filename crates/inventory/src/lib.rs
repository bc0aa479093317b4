//! Inventory domain module.
//!
//! The `Inventory` aggregate tracks stock of one product at one location,
//! keeps an append-only movement history, and raises `LowStockDomainEvent`s
//! for the outbox to deliver.

pub mod inventory;
pub mod low_stock;
pub mod movement;

pub use inventory::{Inventory, InventoryId, InventorySnapshot};
pub use low_stock::LowStockDomainEvent;
pub use movement::{MovementId, MovementType, StockMovement};
