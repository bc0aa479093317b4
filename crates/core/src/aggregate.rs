//! Aggregate root traits for state-based domain models.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Aggregates are the only entry point for mutating the records they own.
/// They perform no IO; persistence reads their state (and pending events)
/// through the accessors below.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Persisted version of the aggregate's state.
    ///
    /// `0` means "never saved". The unit of work bumps it by one on every
    /// successful commit.
    fn version(&self) -> u64;

    /// Record the version assigned by a successful commit.
    fn set_version(&mut self, version: u64);
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the stored aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Explicit pending-events accessor.
///
/// Aggregates collect the domain events raised by their mutations in a
/// buffer that the persistence layer drains at save time. The buffer is only
/// cleared after the surrounding transaction commits, so a failed save keeps
/// the events pending for the next attempt.
pub trait RaisesEvents {
    type Event: Clone + core::fmt::Debug;

    /// Events raised since the last successful save, oldest first.
    fn pending_events(&self) -> &[Self::Event];

    /// Drop all pending events (called after commit).
    fn clear_events(&mut self);

    fn has_pending_events(&self) -> bool {
        !self.pending_events().is_empty()
    }
}
