//! Admin event channel.
//!
//! Events are out-of-band notifications about agent activity, such as
//! connection state changes. Delivery is best-effort and at-most-once: the
//! channel is bounded and [`EventBus::emit`] never waits, so an event emitted
//! while the channel is full is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An admin notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminEvent {
    /// Event topic, e.g. `connections`
    pub topic: String,
    /// Event body
    pub payload: Value,
}

/// Sending half of the admin event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::Sender<AdminEvent>,
}

impl EventBus {
    /// Creates a bus with the given capacity and its receiving half.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AdminEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Emits an event without waiting.
    ///
    /// Returns `false` if the event was dropped.
    pub fn emit(&self, topic: impl Into<String>, payload: Value) -> bool {
        let event = AdminEvent {
            topic: topic.into(),
            payload,
        };
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(topic = %event.topic, "admin event channel full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(topic = %event.topic, "admin event channel closed, dropping event");
                false
            }
        }
    }
}

/// Spawns a worker that drains `receiver` into `sink` until every sender is gone.
pub fn spawn_drain<F>(mut receiver: mpsc::Receiver<AdminEvent>, sink: F) -> JoinHandle<()>
where
    F: Fn(AdminEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            sink(event);
        }
    })
}

/// Spawns a drain worker that logs every event.
pub fn spawn_logger(receiver: mpsc::Receiver<AdminEvent>) -> JoinHandle<()> {
    spawn_drain(receiver, |event| {
        debug!(topic = %event.topic, payload = %event.payload, "admin event");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_emit_and_receive() {
        let (bus, mut receiver) = EventBus::new(4);
        assert!(bus.emit("connections", json!({"state": "invitation"})));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.topic, "connections");
        assert_eq!(event.payload["state"], "invitation");
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let (bus, mut receiver) = EventBus::new(1);
        assert!(bus.emit("one", json!(1)));
        assert!(!bus.emit("two", json!(2)));

        assert_eq!(receiver.recv().await.unwrap().topic, "one");
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_drops() {
        let (bus, receiver) = EventBus::new(1);
        drop(receiver);
        assert!(!bus.emit("lost", json!(null)));
    }

    #[tokio::test]
    async fn test_drain_worker() {
        let (bus, receiver) = EventBus::new(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = spawn_drain(receiver, move |event| {
            sink.lock().unwrap().push(event.topic);
        });

        bus.emit("a", json!(null));
        bus.emit("b", json!(null));
        drop(bus);
        worker.await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
