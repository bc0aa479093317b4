//! Realtime push to connected clients.
//!
//! Delivery is broadcast-only and at-most-once: no acknowledgements, no
//! per-connection addressing, and slow subscribers lose messages instead of
//! holding up the sender.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

/// A named message pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    /// Client-side method name, e.g. `ReceiveLowStockAlert`.
    pub method: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("realtime notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait RealtimeNotifier: Send + Sync {
    /// Push `payload` to all connected clients under `method`.
    ///
    /// Returns how many subscribers the message was handed to; zero
    /// subscribers is not an error.
    async fn broadcast(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<usize, NotifyError>;
}

/// In-process notifier backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<RealtimeMessage>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stream of messages sent after this call.
    ///
    /// A subscriber that falls more than `capacity` messages behind skips
    /// the overwritten ones.
    pub fn subscribe(&self) -> impl Stream<Item = RealtimeMessage> + Send + 'static {
        BroadcastStream::new(self.sender.subscribe()).filter_map(|item| match item {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, "realtime subscriber lagged, messages dropped");
                None
            }
        })
    }
}

#[async_trait]
impl RealtimeNotifier for BroadcastNotifier {
    async fn broadcast(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<usize, NotifyError> {
        let message = RealtimeMessage {
            method: method.to_string(),
            payload,
        };

        match self.sender.send(message) {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                debug!(method, "no realtime subscribers connected");
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = Box::pin(notifier.subscribe());
        let mut b = Box::pin(notifier.subscribe());

        let sent = notifier
            .broadcast("ReceiveLowStockAlert", json!({ "quantity": "15" }))
            .await
            .unwrap();

        assert_eq!(sent, 2);
        for stream in [&mut a, &mut b] {
            let message = stream.next().await.unwrap();
            assert_eq!(message.method, "ReceiveLowStockAlert");
            assert_eq!(message.payload["quantity"], "15");
        }
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_not_an_error() {
        let notifier = BroadcastNotifier::new(8);
        assert_eq!(notifier.subscriber_count(), 0);
        assert_eq!(notifier.broadcast("Ping", json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_overwritten_messages() {
        let notifier = BroadcastNotifier::new(2);
        let mut stream = Box::pin(notifier.subscribe());

        for n in 0..5 {
            notifier.broadcast("Tick", json!(n)).await.unwrap();
        }

        let first = stream.next().await.unwrap();
        assert_eq!(first.payload, json!(3));
        let second = stream.next().await.unwrap();
        assert_eq!(second.payload, json!(4));
    }
}
