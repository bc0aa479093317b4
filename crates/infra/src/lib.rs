//! Infrastructure layer: persistence, the transactional outbox, realtime
//! notifications, and configuration.

pub mod config;
pub mod error;
pub mod notifications;
pub mod outbox;
pub mod uow;

pub use config::{AppConfig, ConfigError, OutboxConfig};
pub use error::PersistenceError;
pub use notifications::{BroadcastNotifier, NotifyError, RealtimeMessage, RealtimeNotifier};
pub use outbox::{
    DecodeError, DispatchOutcome, DispatchReport, DispatcherStats, OutboxDispatcher,
    OutboxDispatcherHandle, OutboxEvent, OutboxMessage, OutboxStore, capture_events,
};
pub use uow::{InMemoryStore, PostgresStore, UnitOfWork};
