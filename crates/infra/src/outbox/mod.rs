//! Transactional outbox.
//!
//! Events raised by aggregates are serialized into `OutboxMessage` rows in
//! the same transaction as the state change that raised them, then
//! delivered later by the [`OutboxDispatcher`].
//!
//! The set of deliverable events is closed: [`OutboxEvent`] lists every
//! known kind and its stored type name. Adding an event kind means adding a
//! variant and a row in the mapping below.

pub mod capture;
pub mod dispatcher;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use stockroom_events::Event;
use stockroom_inventory::LowStockDomainEvent;
use stockroom_products::{ProductActivated, ProductArchived, ProductCreated, ProductEvent};

use crate::error::PersistenceError;

pub use capture::capture_events;
pub use dispatcher::{
    DispatchOutcome, DispatchReport, DispatcherStats, OutboxDispatcher, OutboxDispatcherHandle,
};
pub use store::OutboxStore;

/// A captured event waiting for (or done with) delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Same as the event id, so a delivery can be traced to the raising call.
    pub id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Last delivery or decode failure.
    pub error: Option<String>,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl OutboxMessage {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    pub fn is_dead_letter(&self, max_attempts: u32) -> bool {
        self.processed_at.is_none() && self.attempts >= max_attempts
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("invalid payload for {event_type}: {reason}")]
    Payload { event_type: String, reason: String },
}

const LOW_STOCK: &str = LowStockDomainEvent::EVENT_TYPE;
const PRODUCT_CREATED: &str = "products.product.created";
const PRODUCT_ACTIVATED: &str = "products.product.activated";
const PRODUCT_ARCHIVED: &str = "products.product.archived";

/// Every event kind the outbox can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxEvent {
    LowStock(LowStockDomainEvent),
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
}

impl OutboxEvent {
    /// Stored type names, one per variant.
    pub const KNOWN_TYPES: [&'static str; 4] =
        [LOW_STOCK, PRODUCT_CREATED, PRODUCT_ACTIVATED, PRODUCT_ARCHIVED];

    pub fn to_message(&self, created_at: DateTime<Utc>) -> Result<OutboxMessage, PersistenceError> {
        let payload = match self {
            OutboxEvent::LowStock(e) => serde_json::to_value(e),
            OutboxEvent::ProductCreated(e) => serde_json::to_value(e),
            OutboxEvent::ProductActivated(e) => serde_json::to_value(e),
            OutboxEvent::ProductArchived(e) => serde_json::to_value(e),
        }
        .map_err(|e| {
            PersistenceError::Serialization(format!(
                "failed to serialize {}: {e}",
                self.event_type()
            ))
        })?;

        Ok(OutboxMessage {
            id: self.event_id(),
            event_type: self.event_type().to_string(),
            payload,
            created_at,
            processed_at: None,
            error: None,
            attempts: 0,
        })
    }

    pub fn from_message(message: &OutboxMessage) -> Result<Self, DecodeError> {
        let event_type = message.event_type.as_str();
        let payload = message.payload.clone();

        let decoded = match event_type {
            LOW_STOCK => serde_json::from_value(payload).map(OutboxEvent::LowStock),
            PRODUCT_CREATED => serde_json::from_value(payload).map(OutboxEvent::ProductCreated),
            PRODUCT_ACTIVATED => {
                serde_json::from_value(payload).map(OutboxEvent::ProductActivated)
            }
            PRODUCT_ARCHIVED => serde_json::from_value(payload).map(OutboxEvent::ProductArchived),
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };

        decoded.map_err(|e| DecodeError::Payload {
            event_type: event_type.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Event for OutboxEvent {
    fn event_id(&self) -> Uuid {
        match self {
            OutboxEvent::LowStock(e) => e.event_id,
            OutboxEvent::ProductCreated(e) => e.event_id,
            OutboxEvent::ProductActivated(e) => e.event_id,
            OutboxEvent::ProductArchived(e) => e.event_id,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            OutboxEvent::LowStock(_) => LOW_STOCK,
            OutboxEvent::ProductCreated(_) => PRODUCT_CREATED,
            OutboxEvent::ProductActivated(_) => PRODUCT_ACTIVATED,
            OutboxEvent::ProductArchived(_) => PRODUCT_ARCHIVED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OutboxEvent::LowStock(e) => e.occurred_at,
            OutboxEvent::ProductCreated(e) => e.occurred_at,
            OutboxEvent::ProductActivated(e) => e.occurred_at,
            OutboxEvent::ProductArchived(e) => e.occurred_at,
        }
    }
}

impl From<LowStockDomainEvent> for OutboxEvent {
    fn from(event: LowStockDomainEvent) -> Self {
        OutboxEvent::LowStock(event)
    }
}

impl From<ProductEvent> for OutboxEvent {
    fn from(event: ProductEvent) -> Self {
        match event {
            ProductEvent::ProductCreated(e) => OutboxEvent::ProductCreated(e),
            ProductEvent::ProductActivated(e) => OutboxEvent::ProductActivated(e),
            ProductEvent::ProductArchived(e) => OutboxEvent::ProductArchived(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;
    use stockroom_core::{LocationId, RaisesEvents};
    use stockroom_products::{Product, ProductId};

    use super::*;

    fn low_stock() -> LowStockDomainEvent {
        LowStockDomainEvent::new(ProductId::generate(), LocationId::new(), dec!(15), Utc::now())
    }

    #[test]
    fn message_carries_type_name_and_event_id() {
        let event = OutboxEvent::from(low_stock());
        let message = event.to_message(Utc::now()).unwrap();

        assert_eq!(message.id, event.event_id());
        assert_eq!(message.event_type, "inventory.low_stock");
        assert_eq!(message.payload["quantity"], json!("15"));
        assert_eq!(message.attempts, 0);
        assert!(!message.is_processed());
    }

    #[test]
    fn decode_restores_the_same_event() {
        let event = OutboxEvent::from(low_stock());
        let message = event.to_message(Utc::now()).unwrap();

        assert_eq!(OutboxEvent::from_message(&message).unwrap(), event);
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut message = OutboxEvent::from(low_stock()).to_message(Utc::now()).unwrap();
        message.event_type = "inventory.exploded".to_string();

        assert_eq!(
            OutboxEvent::from_message(&message),
            Err(DecodeError::UnknownType("inventory.exploded".to_string()))
        );
    }

    #[test]
    fn decode_rejects_bad_payload() {
        let mut message = OutboxEvent::from(low_stock()).to_message(Utc::now()).unwrap();
        message.payload = json!({ "quantity": "many" });

        match OutboxEvent::from_message(&message) {
            Err(DecodeError::Payload { event_type, .. }) => {
                assert_eq!(event_type, "inventory.low_stock")
            }
            other => panic!("expected payload error, got {other:?}"),
        }
    }

    #[test]
    fn product_event_names_match_the_mapping_table() {
        let mut product = Product::create(ProductId::generate(), "SKU", "Name", Utc::now()).unwrap();
        product.activate(Utc::now()).unwrap();
        product.archive(Utc::now()).unwrap();

        for event in product.pending_events() {
            let mapped = OutboxEvent::from(event.clone());
            assert_eq!(mapped.event_type(), event.event_type());
            assert!(OutboxEvent::KNOWN_TYPES.contains(&mapped.event_type()));
        }
    }
}
