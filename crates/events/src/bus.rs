//! In-process publish/subscribe (mediator).
//!
//! The mediator is the last hop of outbox delivery: the dispatcher decodes
//! an outbox row into an event and calls [`Mediator::publish`], which fans
//! the event out to every handler registered for its type.
//!
//! ## Delivery semantics
//!
//! - All handlers for a type run, in registration order, even if an earlier
//!   one fails.
//! - Failures are collected and returned together so the caller can decide
//!   what happens to the source row.
//! - Publishing an event nobody subscribed to is not an error.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::event::Event;
use crate::handler::{EventHandler, HandlerError};

/// One handler's failure while publishing an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub handler: String,
    pub error: HandlerError,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("{} of {total} handler(s) failed for {event_type}: {}", failures.len(), summarize(failures))]
    Handlers {
        event_type: &'static str,
        total: usize,
        failures: Vec<HandlerFailure>,
    },
}

fn summarize(failures: &[HandlerFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.handler, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Registry of handlers keyed by event type name.
pub struct Mediator<E> {
    handlers: HashMap<&'static str, Vec<Arc<dyn EventHandler<E>>>>,
}

impl<E> Default for Mediator<E> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<E> core::fmt::Debug for Mediator<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self
            .handlers
            .iter()
            .map(|(t, hs)| (*t, hs.len()))
            .collect();
        types.sort();
        f.debug_struct("Mediator").field("handlers", &types).finish()
    }
}

impl<E: Event> Mediator<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for events whose `event_type()` equals `event_type`.
    pub fn register(&mut self, event_type: &'static str, handler: Arc<dyn EventHandler<E>>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_handler(mut self, event_type: &'static str, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.register(event_type, handler);
        self
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the event's type.
    ///
    /// Returns the number of handlers that ran successfully.
    pub async fn publish(&self, event: &E) -> Result<usize, PublishError> {
        let event_type = event.event_type();
        let Some(handlers) = self.handlers.get(event_type) else {
            debug!(event_type, event_id = %event.event_id(), "no handlers registered");
            return Ok(0);
        };

        let mut failures = Vec::new();
        for handler in handlers {
            if let Err(error) = handler.handle(event).await {
                warn!(
                    event_type,
                    event_id = %event.event_id(),
                    handler = handler.name(),
                    error = %error,
                    "event handler failed"
                );
                failures.push(HandlerFailure {
                    handler: handler.name().to_string(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(handlers.len())
        } else {
            Err(PublishError::Handlers {
                event_type,
                total: handlers.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    use super::*;

    #[derive(Debug, Clone)]
    struct Ping {
        id: Uuid,
        at: DateTime<Utc>,
    }

    impl Ping {
        fn new() -> Self {
            Self {
                id: Uuid::now_v7(),
                at: Utc::now(),
            }
        }
    }

    impl Event for Ping {
        fn event_id(&self) -> Uuid {
            self.id
        }

        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    struct Recorder {
        name: &'static str,
        seen: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn seen(&self) -> Vec<Uuid> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventHandler<Ping> for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, event: &Ping) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(event.id);
            if self.fail {
                Err(HandlerError::new("boom"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_registered_handler() {
        let a = Recorder::new("a", false);
        let b = Recorder::new("b", false);
        let mediator = Mediator::<Ping>::new()
            .with_handler("test.ping", a.clone())
            .with_handler("test.ping", b.clone());

        let ping = Ping::new();
        let ran = mediator.publish(&ping).await.unwrap();

        assert_eq!(ran, 2);
        assert_eq!(a.seen(), vec![ping.id]);
        assert_eq!(b.seen(), vec![ping.id]);
    }

    #[tokio::test]
    async fn publish_without_handlers_is_ok() {
        let mediator: Mediator<Ping> = Mediator::new();
        assert_eq!(mediator.publish(&Ping::new()).await.unwrap(), 0);
        assert_eq!(mediator.handler_count("test.ping"), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_others() {
        let bad = Recorder::new("bad", true);
        let good = Recorder::new("good", false);
        let mediator = Mediator::<Ping>::new()
            .with_handler("test.ping", bad.clone())
            .with_handler("test.ping", good.clone());

        let err = mediator.publish(&Ping::new()).await.unwrap_err();

        assert_eq!(good.seen().len(), 1);
        match err {
            PublishError::Handlers { total, failures, .. } => {
                assert_eq!(total, 2);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].handler, "bad");
            }
        }
    }
}
