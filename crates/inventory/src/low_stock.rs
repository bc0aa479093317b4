use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroom_core::LocationId;
use stockroom_events::Event;
use stockroom_products::ProductId;

/// Raised when a stock update leaves the quantity on hand below the reorder level.
///
/// Every such update raises a new event; consumers must not expect one event
/// per threshold crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockDomainEvent {
    pub event_id: Uuid,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl LowStockDomainEvent {
    pub const EVENT_TYPE: &'static str = "inventory.low_stock";

    pub fn new(
        product_id: ProductId,
        location_id: LocationId,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            product_id,
            location_id,
            quantity,
            occurred_at,
        }
    }
}

impl Event for LowStockDomainEvent {
    fn event_id(&self) -> Uuid {
        self.event_id
    }

    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
