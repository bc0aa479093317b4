//! Save-time capture of pending aggregate events into outbox rows.

use chrono::{DateTime, Utc};

use stockroom_core::{AggregateRoot, Auditable, RaisesEvents, UserId};

use super::{OutboxEvent, OutboxMessage};
use crate::error::PersistenceError;

/// Serialize every pending event of `aggregate` into an outbox row.
///
/// Does not clear the events; that happens only after the surrounding
/// transaction commits.
pub fn capture_events<A>(
    aggregate: &A,
    created_at: DateTime<Utc>,
) -> Result<Vec<OutboxMessage>, PersistenceError>
where
    A: RaisesEvents,
    A::Event: Into<OutboxEvent>,
{
    aggregate
        .pending_events()
        .iter()
        .map(|event| {
            let event: OutboxEvent = event.clone().into();
            event.to_message(created_at)
        })
        .collect()
}

/// An aggregate prepared for saving plus the outbox rows it produces.
///
/// Stores write `aggregate` and `messages` in one transaction, then call
/// [`Staged::commit_into`] so the caller's aggregate only changes once the
/// write succeeded.
#[derive(Debug)]
pub(crate) struct Staged<A> {
    pub aggregate: A,
    pub expected_version: u64,
    pub messages: Vec<OutboxMessage>,
}

impl<A> Staged<A>
where
    A: AggregateRoot + Auditable + RaisesEvents + Clone,
    A::Event: Into<OutboxEvent>,
{
    pub fn prepare(
        aggregate: &A,
        actor: Option<UserId>,
        at: DateTime<Utc>,
    ) -> Result<Self, PersistenceError> {
        let mut staged = aggregate.clone();
        staged.stamp_audit(actor, at);
        let messages = capture_events(&staged, at)?;

        Ok(Self {
            expected_version: aggregate.version(),
            aggregate: staged,
            messages,
        })
    }

    pub fn next_version(&self) -> u64 {
        self.expected_version + 1
    }

    /// Publish the committed state back to the caller's aggregate.
    pub fn commit_into(mut self, target: &mut A) {
        let next = self.next_version();
        self.aggregate.clear_events();
        self.aggregate.set_version(next);
        *target = self.aggregate;
    }
}
