use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - uniquely identified, so a delivered event can be traced back to its outbox row
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Unique identifier assigned when the event was raised.
    fn event_id(&self) -> Uuid;

    /// Stable event name/type identifier (e.g. "inventory.low_stock").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
