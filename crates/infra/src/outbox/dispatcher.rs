//! Polling outbox dispatcher.
//!
//! Each cycle fetches a batch of unprocessed rows (oldest first), decodes
//! them into [`OutboxEvent`]s, publishes them through the mediator, and
//! records the outcome per row:
//!
//! | outcome | row update |
//! |---|---|
//! | all handlers succeeded | `processed_at` set |
//! | a handler failed | `attempts += 1`, `error` set; retried next cycle until `max_attempts` |
//! | unknown type / bad payload | `attempts = max_attempts`, `error` set (dead letter) |
//! | store failure | cycle aborted, rows untouched |
//!
//! Cycles are single-flight: a `run_once` that starts while another is in
//! progress returns [`DispatchOutcome::Skipped`] without touching the store.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use stockroom_events::{Event, Mediator};

use super::store::OutboxStore;
use super::{OutboxEvent, OutboxMessage};
use crate::config::OutboxConfig;
use crate::error::PersistenceError;

/// Per-cycle counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub fetched: usize,
    pub processed: usize,
    /// Handler failures that will be retried.
    pub failed: usize,
    /// Rows that became dead letters this cycle.
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed(DispatchReport),
    /// Another cycle was already running.
    Skipped,
}

/// Running totals across cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub cycles: u64,
    pub skipped: u64,
    pub processed: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub last_error: Option<String>,
}

pub struct OutboxDispatcher<S> {
    store: S,
    mediator: Arc<Mediator<OutboxEvent>>,
    config: OutboxConfig,
    in_flight: tokio::sync::Mutex<()>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl<S: OutboxStore + 'static> OutboxDispatcher<S> {
    pub fn new(store: S, mediator: Arc<Mediator<OutboxEvent>>, config: OutboxConfig) -> Self {
        Self {
            store,
            mediator,
            config,
            in_flight: tokio::sync::Mutex::new(()),
            stats: Arc::new(Mutex::new(DispatcherStats::default())),
        }
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatcherStats {
        read_stats(&self.stats)
    }

    /// Run one dispatch cycle.
    pub async fn run_once(&self) -> Result<DispatchOutcome, PersistenceError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("outbox dispatch already in progress, skipping cycle");
            self.update_stats(|s| s.skipped += 1);
            return Ok(DispatchOutcome::Skipped);
        };

        let result = self.dispatch_batch().await;

        match &result {
            Ok(report) => self.update_stats(|s| {
                s.cycles += 1;
                s.processed += report.processed as u64;
                s.failed += report.failed as u64;
                s.dead_lettered += report.dead_lettered as u64;
            }),
            Err(e) => {
                let message = e.to_string();
                self.update_stats(|s| {
                    s.cycles += 1;
                    s.last_error = Some(message);
                });
            }
        }

        result.map(DispatchOutcome::Completed)
    }

    async fn dispatch_batch(&self) -> Result<DispatchReport, PersistenceError> {
        let max_attempts = self.config.max_attempts;
        let messages = self
            .store
            .fetch_unprocessed(self.config.batch_size, max_attempts)
            .await?;

        let mut report = DispatchReport {
            fetched: messages.len(),
            ..DispatchReport::default()
        };

        for message in &messages {
            self.dispatch_one(message, &mut report).await?;
        }

        if report.fetched > 0 {
            info!(
                fetched = report.fetched,
                processed = report.processed,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "outbox dispatch cycle finished"
            );
        }

        Ok(report)
    }

    async fn dispatch_one(
        &self,
        message: &OutboxMessage,
        report: &mut DispatchReport,
    ) -> Result<(), PersistenceError> {
        let max_attempts = self.config.max_attempts;

        let event = match OutboxEvent::from_message(message) {
            Ok(event) => event,
            Err(decode) => {
                warn!(
                    outbox_id = %message.id,
                    event_type = %message.event_type,
                    error = %decode,
                    "undecodable outbox message, dead-lettering"
                );
                self.store
                    .record_failure(message.id, &decode.to_string(), max_attempts)
                    .await?;
                report.dead_lettered += 1;
                return Ok(());
            }
        };

        match self.mediator.publish(&event).await {
            Ok(handlers) => {
                self.store.mark_processed(message.id, Utc::now()).await?;
                debug!(
                    outbox_id = %message.id,
                    event_type = event.event_type(),
                    handlers,
                    "outbox message processed"
                );
                report.processed += 1;
            }
            Err(publish) => {
                let attempts = message.attempts.saturating_add(1);
                self.store
                    .record_failure(message.id, &publish.to_string(), attempts)
                    .await?;

                if attempts >= max_attempts {
                    warn!(
                        outbox_id = %message.id,
                        event_type = event.event_type(),
                        attempts,
                        error = %publish,
                        "outbox message out of attempts, dead-lettered"
                    );
                    report.dead_lettered += 1;
                } else {
                    warn!(
                        outbox_id = %message.id,
                        event_type = event.event_type(),
                        attempts,
                        error = %publish,
                        "outbox message delivery failed, will retry"
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(())
    }

    fn update_stats(&self, f: impl FnOnce(&mut DispatcherStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut stats);
    }

    /// Run cycles on `config.poll_interval` until the handle is shut down.
    pub fn spawn(self: &Arc<Self>) -> OutboxDispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let dispatcher = Arc::clone(self);
        let interval = self.config.poll_interval;

        let join = tokio::spawn(async move {
            info!(
                poll_interval_ms = interval.as_millis() as u64,
                batch_size = dispatcher.config.batch_size,
                max_attempts = dispatcher.config.max_attempts,
                "outbox dispatcher started"
            );

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.run_once().await {
                            error!(error = %e, "outbox dispatch cycle failed");
                        }
                    }
                }
            }

            info!("outbox dispatcher stopped");
        });

        OutboxDispatcherHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats: Arc::clone(&self.stats),
        }
    }
}

fn read_stats(stats: &Mutex<DispatcherStats>) -> DispatcherStats {
    stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
}

/// Handle to a running dispatcher.
#[derive(Debug)]
pub struct OutboxDispatcherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<DispatcherStats>>,
}

impl OutboxDispatcherHandle {
    /// Stop polling and wait for the current cycle to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "outbox dispatcher task panicked");
            }
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        read_stats(&self.stats)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use stockroom_core::LocationId;
    use stockroom_events::{EventHandler, HandlerError};
    use stockroom_inventory::LowStockDomainEvent;
    use stockroom_products::ProductId;
    use tokio::sync::Notify;

    use super::*;
    use crate::uow::InMemoryStore;

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler<OutboxEvent> for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(HandlerError::new("handler down"))
            } else {
                Ok(())
            }
        }
    }

    /// Blocks inside `handle` until released.
    struct GateHandler {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl EventHandler<OutboxEvent> for GateHandler {
        fn name(&self) -> &str {
            "gate"
        }

        async fn handle(&self, _event: &OutboxEvent) -> Result<(), HandlerError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn low_stock_message() -> OutboxMessage {
        let event = LowStockDomainEvent::new(ProductId::generate(), LocationId::new(), dec!(15), Utc::now());
        OutboxEvent::from(event).to_message(Utc::now()).unwrap()
    }

    fn config() -> OutboxConfig {
        OutboxConfig {
            poll_interval: Duration::from_millis(10),
            batch_size: 20,
            max_attempts: 3,
        }
    }

    fn dispatcher_with(
        store: Arc<InMemoryStore>,
        handler: Arc<dyn EventHandler<OutboxEvent>>,
    ) -> OutboxDispatcher<Arc<InMemoryStore>> {
        let mediator = Mediator::new().with_handler(LowStockDomainEvent::EVENT_TYPE, handler);
        OutboxDispatcher::new(store, Arc::new(mediator), config())
    }

    #[tokio::test]
    async fn successful_delivery_marks_row_processed() {
        let store = Arc::new(InMemoryStore::new());
        let message = low_stock_message();
        store.insert_outbox_message(message.clone()).unwrap();
        let handler = CountingHandler::new(false);
        let dispatcher = dispatcher_with(store.clone(), handler.clone());

        let outcome = dispatcher.run_once().await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Completed(DispatchReport {
                fetched: 1,
                processed: 1,
                failed: 0,
                dead_lettered: 0,
            })
        );
        assert_eq!(handler.calls(), 1);
        let rows = store.outbox_messages().unwrap();
        assert!(rows[0].is_processed());

        // processed rows are not fetched again
        dispatcher.run_once().await.unwrap();
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_retried_then_dead_lettered() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_outbox_message(low_stock_message()).unwrap();
        let handler = CountingHandler::new(true);
        let dispatcher = dispatcher_with(store.clone(), handler.clone());

        for _ in 0..2 {
            match dispatcher.run_once().await.unwrap() {
                DispatchOutcome::Completed(report) => assert_eq!(report.failed, 1),
                DispatchOutcome::Skipped => panic!("unexpected skip"),
            }
        }
        match dispatcher.run_once().await.unwrap() {
            DispatchOutcome::Completed(report) => assert_eq!(report.dead_lettered, 1),
            DispatchOutcome::Skipped => panic!("unexpected skip"),
        }

        // out of attempts: no further deliveries
        dispatcher.run_once().await.unwrap();
        assert_eq!(handler.calls(), 3);

        let dead = store.dead_letters(10, 3).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert!(dead[0].error.as_deref().unwrap().contains("handler down"));
        assert_eq!(dispatcher.stats().dead_lettered, 1);
    }

    #[tokio::test]
    async fn undecodable_rows_are_dead_lettered_without_blocking_others() {
        let store = Arc::new(InMemoryStore::new());
        let mut unknown = low_stock_message();
        unknown.event_type = "inventory.exploded".to_string();
        let mut garbled = low_stock_message();
        garbled.payload = json!({ "nope": true });
        store.insert_outbox_message(unknown.clone()).unwrap();
        store.insert_outbox_message(garbled.clone()).unwrap();
        store.insert_outbox_message(low_stock_message()).unwrap();

        let handler = CountingHandler::new(false);
        let dispatcher = dispatcher_with(store.clone(), handler.clone());

        match dispatcher.run_once().await.unwrap() {
            DispatchOutcome::Completed(report) => {
                assert_eq!(report.fetched, 3);
                assert_eq!(report.dead_lettered, 2);
                assert_eq!(report.processed, 1);
            }
            DispatchOutcome::Skipped => panic!("unexpected skip"),
        }
        assert_eq!(handler.calls(), 1);

        let dead = store.dead_letters(10, 3).await.unwrap();
        let ids: Vec<_> = dead.iter().map(|m| m.id).collect();
        assert!(ids.contains(&unknown.id));
        assert!(ids.contains(&garbled.id));
        assert!(dead.iter().all(|m| m.error.is_some()));
    }

    #[tokio::test]
    async fn batch_size_limits_each_cycle() {
        let store = Arc::new(InMemoryStore::new());
        for _ in 0..25 {
            store.insert_outbox_message(low_stock_message()).unwrap();
        }
        let handler = CountingHandler::new(false);
        let dispatcher = dispatcher_with(store.clone(), handler.clone());

        dispatcher.run_once().await.unwrap();
        assert_eq!(handler.calls(), 20);

        dispatcher.run_once().await.unwrap();
        assert_eq!(handler.calls(), 25);
    }

    #[tokio::test]
    async fn concurrent_cycles_are_single_flight() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_outbox_message(low_stock_message()).unwrap();
        let gate = Arc::new(GateHandler {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let dispatcher = Arc::new(dispatcher_with(store.clone(), gate.clone()));

        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run_once().await })
        };
        gate.entered.notified().await;

        let second = dispatcher.run_once().await.unwrap();
        assert_eq!(second, DispatchOutcome::Skipped);

        gate.release.notify_one();
        match first.await.unwrap().unwrap() {
            DispatchOutcome::Completed(report) => assert_eq!(report.processed, 1),
            DispatchOutcome::Skipped => panic!("first cycle should run"),
        }
        assert_eq!(dispatcher.stats().skipped, 1);
    }

    #[tokio::test]
    async fn spawned_dispatcher_polls_until_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_outbox_message(low_stock_message()).unwrap();
        let handler = CountingHandler::new(false);
        let dispatcher = Arc::new(dispatcher_with(store.clone(), handler.clone()));

        let handle = dispatcher.spawn();
        for _ in 0..200 {
            if handle.stats().processed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.processed, 1);
        assert_eq!(handler.calls(), 1);
        assert!(store.outbox_messages().unwrap()[0].is_processed());
    }
}
