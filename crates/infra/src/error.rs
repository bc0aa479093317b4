//! Persistence errors shared by the unit of work and the outbox store.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Stored version differs from the version the caller loaded.
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Row or payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Database, pool, or lock failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PersistenceError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, PersistenceError::Concurrency(_))
    }
}

/// Map a sqlx error to a persistence error.
///
/// | SQLx error | code | result |
/// |---|---|---|
/// | unique violation | `23505` | `Concurrency` |
/// | serialization failure | `40001` | `Concurrency` |
/// | foreign key violation | `23503` | `NotFound` |
/// | any other database error | | `Storage` |
/// | `RowNotFound` | | `NotFound` |
/// | `ColumnDecode` / `Decode` | | `Serialization` |
/// | pool closed, io, tls, ... | | `Storage` |
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PersistenceError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => PersistenceError::Concurrency(msg),
                Some("23503") => PersistenceError::NotFound(msg),
                _ => PersistenceError::Storage(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            PersistenceError::NotFound(format!("row not found in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            PersistenceError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            PersistenceError::Storage(format!("connection pool closed in {}", operation))
        }
        other => PersistenceError::Storage(format!("{} failed: {}", operation, other)),
    }
}
