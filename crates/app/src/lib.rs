//! Application layer: use-case services over the unit of work, the error
//! taxonomy surfaced to callers, and the low-stock event handlers.

pub mod errors;
pub mod handlers;
pub mod services;

pub use errors::AppError;
pub use handlers::{LOW_STOCK_ALERT_METHOD, LowStockAlertHandler, LowStockLogHandler, build_mediator};
pub use services::{InventoryService, NewInventory, ProductService};
