use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::OutboxMessage;
use crate::error::PersistenceError;

/// Queue side of the outbox: reading pending rows and recording outcomes.
///
/// Rows are written by the unit of work; this trait never inserts.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Oldest-first (`created_at`, then `id`) rows that are neither processed
    /// nor out of attempts.
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError>;

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PersistenceError>;

    /// Store the failure text and the new attempt count.
    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        attempts: u32,
    ) -> Result<(), PersistenceError>;

    /// Unprocessed rows that have used up their attempts.
    async fn dead_letters(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError>;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn fetch_unprocessed(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        (**self).fetch_unprocessed(limit, max_attempts).await
    }

    async fn mark_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        (**self).mark_processed(id, at).await
    }

    async fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        attempts: u32,
    ) -> Result<(), PersistenceError> {
        (**self).record_failure(id, error, attempts).await
    }

    async fn dead_letters(
        &self,
        limit: usize,
        max_attempts: u32,
    ) -> Result<Vec<OutboxMessage>, PersistenceError> {
        (**self).dead_letters(limit, max_attempts).await
    }
}
