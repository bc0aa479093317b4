use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a single event handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Reacts to a published event (in-process subscriber).
///
/// Handlers run after the triggering transaction has committed, so they
/// must not assume they are the only delivery of an event: a failed cycle
/// may redeliver to every handler of that event.
#[async_trait]
pub trait EventHandler<E>: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}
