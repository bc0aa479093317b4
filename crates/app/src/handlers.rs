//! Subscribers for delivered outbox events.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use stockroom_core::LocationId;
use stockroom_events::{Event, EventEnvelope, EventHandler, HandlerError, Mediator};
use stockroom_infra::{OutboxEvent, RealtimeNotifier};
use stockroom_inventory::LowStockDomainEvent;
use stockroom_products::ProductId;

/// Client method invoked for low-stock alerts.
pub const LOW_STOCK_ALERT_METHOD: &str = "ReceiveLowStockAlert";

/// Body of a low-stock alert pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: Decimal,
}

/// Writes a warning for every low-stock event.
#[derive(Debug, Default)]
pub struct LowStockLogHandler;

#[async_trait]
impl EventHandler<OutboxEvent> for LowStockLogHandler {
    fn name(&self) -> &str {
        "low_stock_log"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        if let OutboxEvent::LowStock(e) = event {
            warn!(
                product_id = %e.product_id,
                location_id = %e.location_id,
                quantity = %e.quantity,
                "low stock"
            );
        }
        Ok(())
    }
}

/// Pushes low-stock alerts to every connected client.
pub struct LowStockAlertHandler {
    notifier: Arc<dyn RealtimeNotifier>,
}

impl LowStockAlertHandler {
    pub fn new(notifier: Arc<dyn RealtimeNotifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler<OutboxEvent> for LowStockAlertHandler {
    fn name(&self) -> &str {
        "low_stock_alert"
    }

    async fn handle(&self, event: &OutboxEvent) -> Result<(), HandlerError> {
        let OutboxEvent::LowStock(e) = event else {
            return Ok(());
        };

        let envelope = EventEnvelope::new(
            e.event_id(),
            e.event_type(),
            e.occurred_at(),
            LowStockAlert {
                product_id: e.product_id,
                location_id: e.location_id,
                quantity: e.quantity,
            },
        );
        let payload = serde_json::to_value(&envelope)
            .map_err(|err| HandlerError::new(format!("failed to encode alert: {err}")))?;

        self.notifier
            .broadcast(LOW_STOCK_ALERT_METHOD, payload)
            .await
            .map_err(|err| HandlerError::new(err.to_string()))?;
        Ok(())
    }
}

/// Mediator with the low-stock handlers registered.
pub fn build_mediator(notifier: Arc<dyn RealtimeNotifier>) -> Mediator<OutboxEvent> {
    Mediator::new()
        .with_handler(LowStockDomainEvent::EVENT_TYPE, Arc::new(LowStockLogHandler))
        .with_handler(
            LowStockDomainEvent::EVENT_TYPE,
            Arc::new(LowStockAlertHandler::new(notifier)),
        )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockroom_infra::{BroadcastNotifier, NotifyError};
    use stockroom_products::ProductActivated;
    use tokio_stream::StreamExt;
    use uuid::Uuid;

    use super::*;

    fn low_stock() -> LowStockDomainEvent {
        LowStockDomainEvent::new(ProductId::generate(), LocationId::new(), dec!(15), Utc::now())
    }

    #[tokio::test]
    async fn alert_is_broadcast_with_envelope_metadata() {
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let mut stream = Box::pin(notifier.subscribe());
        let handler = LowStockAlertHandler::new(notifier.clone());
        let event = low_stock();

        handler
            .handle(&OutboxEvent::LowStock(event.clone()))
            .await
            .unwrap();

        let message = stream.next().await.unwrap();
        assert_eq!(message.method, LOW_STOCK_ALERT_METHOD);

        let envelope: EventEnvelope<LowStockAlert> =
            serde_json::from_value(message.payload).unwrap();
        assert_eq!(envelope.event_id(), event.event_id);
        assert_eq!(envelope.event_type(), "inventory.low_stock");
        assert_eq!(envelope.payload().quantity, dec!(15));
        assert_eq!(envelope.payload().product_id, event.product_id);
        assert_eq!(envelope.payload().location_id, event.location_id);
    }

    #[tokio::test]
    async fn other_events_are_ignored() {
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let handler = LowStockAlertHandler::new(notifier);
        let event = OutboxEvent::ProductActivated(ProductActivated {
            event_id: Uuid::now_v7(),
            product_id: ProductId::generate(),
            occurred_at: Utc::now(),
        });

        assert!(handler.handle(&event).await.is_ok());
        assert!(LowStockLogHandler.handle(&event).await.is_ok());
    }

    struct FailingNotifier;

    #[async_trait]
    impl RealtimeNotifier for FailingNotifier {
        async fn broadcast(
            &self,
            _method: &str,
            _payload: serde_json::Value,
        ) -> Result<usize, NotifyError> {
            Err(NotifyError("hub offline".to_string()))
        }
    }

    #[tokio::test]
    async fn notifier_failure_becomes_a_handler_error() {
        let handler = LowStockAlertHandler::new(Arc::new(FailingNotifier));
        let err = handler
            .handle(&OutboxEvent::LowStock(low_stock()))
            .await
            .unwrap_err();
        assert!(err.message().contains("hub offline"));
    }

    #[tokio::test]
    async fn mediator_runs_both_low_stock_handlers() {
        let mediator = build_mediator(Arc::new(BroadcastNotifier::new(8)));
        assert_eq!(mediator.handler_count(LowStockDomainEvent::EVENT_TYPE), 2);

        let ran = mediator
            .publish(&OutboxEvent::LowStock(low_stock()))
            .await
            .unwrap();
        assert_eq!(ran, 2);
    }
}
