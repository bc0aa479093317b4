use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use tokio_stream::StreamExt;

use stockroom_app::{
    InventoryService, LOW_STOCK_ALERT_METHOD, NewInventory, ProductService, build_mediator,
};
use stockroom_core::{LocationId, UserId};
use stockroom_events::{EventHandler, HandlerError};
use stockroom_infra::{
    BroadcastNotifier, DispatchOutcome, InMemoryStore, OutboxConfig, OutboxDispatcher,
    OutboxEvent, OutboxStore, UnitOfWork,
};
use stockroom_inventory::{LowStockDomainEvent, MovementType};

struct Harness {
    store: Arc<InMemoryStore>,
    notifier: Arc<BroadcastNotifier>,
    products: ProductService,
    inventory: InventoryService,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let uow: Arc<dyn UnitOfWork> = store.clone();
    Harness {
        store,
        notifier: Arc::new(BroadcastNotifier::new(16)),
        products: ProductService::new(uow.clone()),
        inventory: InventoryService::new(uow),
    }
}

fn config() -> OutboxConfig {
    OutboxConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 20,
        max_attempts: 3,
    }
}

async fn low_stock_rows(store: &InMemoryStore) -> usize {
    store
        .outbox_messages()
        .unwrap()
        .iter()
        .filter(|m| m.event_type == LowStockDomainEvent::EVENT_TYPE)
        .count()
}

#[tokio::test]
async fn stock_drop_below_reorder_reaches_connected_clients() {
    let h = harness();
    let actor = Some(UserId::new());
    let mut alerts = Box::pin(h.notifier.subscribe());

    let product = h.products.create("SKU-42", "Bolt", actor).await.unwrap();
    h.products.activate(product.id_typed(), actor).await.unwrap();

    let location_id = LocationId::new();
    let inventory = h
        .inventory
        .create_inventory(
            NewInventory {
                product_id: product.id_typed(),
                location_id,
                quantity_on_hand: dec!(100),
                reorder_level: dec!(20),
                max_level: dec!(200),
            },
            actor,
        )
        .await
        .unwrap();
    assert_eq!(low_stock_rows(&h.store).await, 0);

    let updated = h
        .inventory
        .update_stock(inventory.id_typed(), dec!(15), actor)
        .await
        .unwrap();

    let last = updated.movements().last().unwrap();
    assert_eq!(last.movement_type, MovementType::AdjustmentDecrease);
    assert_eq!(last.magnitude(), dec!(85));
    assert_eq!(low_stock_rows(&h.store).await, 1);

    let mediator = Arc::new(build_mediator(h.notifier.clone()));
    let dispatcher = OutboxDispatcher::new(h.store.clone(), mediator, config());

    let report = match dispatcher.run_once().await.unwrap() {
        DispatchOutcome::Completed(report) => report,
        DispatchOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    };
    // created + activated product events, then the low-stock event
    assert_eq!(report.fetched, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.failed, 0);

    let alert = tokio::time::timeout(Duration::from_secs(1), alerts.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.method, LOW_STOCK_ALERT_METHOD);
    assert_eq!(alert.payload["payload"]["quantity"], "15");
    assert_eq!(
        alert.payload["payload"]["location_id"],
        serde_json::to_value(location_id).unwrap()
    );

    let messages = h.store.outbox_messages().unwrap();
    assert!(messages.iter().all(|m| m.is_processed()));
    assert!(h.store.fetch_unprocessed(20, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn each_update_below_threshold_is_delivered_separately() {
    let h = harness();
    let product = h.products.create("SKU-7", "Nut", None).await.unwrap();
    h.products.activate(product.id_typed(), None).await.unwrap();
    let inventory = h
        .inventory
        .create_inventory(
            NewInventory {
                product_id: product.id_typed(),
                location_id: LocationId::new(),
                quantity_on_hand: dec!(50),
                reorder_level: dec!(20),
                max_level: dec!(100),
            },
            None,
        )
        .await
        .unwrap();

    h.inventory
        .update_stock(inventory.id_typed(), dec!(10), None)
        .await
        .unwrap();
    h.inventory
        .adjust_stock(inventory.id_typed(), dec!(-5), MovementType::Sale, None, None)
        .await
        .unwrap();

    assert_eq!(low_stock_rows(&h.store).await, 2);

    let quantities: Vec<_> = h
        .store
        .outbox_messages()
        .unwrap()
        .iter()
        .filter_map(|m| match OutboxEvent::from_message(m).unwrap() {
            OutboxEvent::LowStock(e) => Some(e.quantity),
            _ => None,
        })
        .collect();
    assert_eq!(quantities, vec![dec!(10), dec!(5)]);
}

struct FlakyHandler {
    calls: AtomicUsize,
    fail_first: usize,
}

#[async_trait]
impl EventHandler<OutboxEvent> for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(HandlerError::new("downstream unavailable"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn failed_delivery_is_retried_on_the_next_cycle() {
    let h = harness();
    let product = h.products.create("SKU-9", "Washer", None).await.unwrap();
    h.products.activate(product.id_typed(), None).await.unwrap();
    let inventory = h
        .inventory
        .create_inventory(
            NewInventory {
                product_id: product.id_typed(),
                location_id: LocationId::new(),
                quantity_on_hand: dec!(30),
                reorder_level: dec!(20),
                max_level: dec!(100),
            },
            None,
        )
        .await
        .unwrap();
    h.inventory
        .update_stock(inventory.id_typed(), dec!(5), None)
        .await
        .unwrap();

    let flaky = Arc::new(FlakyHandler {
        calls: AtomicUsize::new(0),
        fail_first: 1,
    });
    let mediator = Arc::new(
        build_mediator(h.notifier.clone())
            .with_handler(LowStockDomainEvent::EVENT_TYPE, flaky.clone()),
    );
    let dispatcher = OutboxDispatcher::new(h.store.clone(), mediator, config());

    let first = match dispatcher.run_once().await.unwrap() {
        DispatchOutcome::Completed(report) => report,
        DispatchOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    };
    assert_eq!(first.failed, 1);

    let pending = h.store.fetch_unprocessed(20, 3).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
    assert!(pending[0].error.as_deref().unwrap().contains("downstream unavailable"));

    let second = match dispatcher.run_once().await.unwrap() {
        DispatchOutcome::Completed(report) => report,
        DispatchOutcome::Skipped => panic!("cycle unexpectedly skipped"),
    };
    assert_eq!(second.processed, 1);
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
    assert!(h.store.fetch_unprocessed(20, 3).await.unwrap().is_empty());
}
