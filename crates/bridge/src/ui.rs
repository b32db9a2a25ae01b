//! UI subscriber fanout.
//!
//! Multiple operator UIs may be connected at once; each gets every outgoing
//! frame. Subscribers whose channel has gone away are removed during the
//! broadcast rather than tracked separately.

use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

/// Broadcast hub for UI-bound JSON frames.
#[derive(Debug, Default)]
pub struct UiHub {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl UiHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new UI connection.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("ui subscribers poisoned")
            .push(tx);
        rx
    }

    /// Send to every live subscriber, dropping the dead ones.
    pub fn broadcast(&self, message: &str) {
        let mut subscribers = self.subscribers.lock().expect("ui subscribers poisoned");
        let before = subscribers.len();
        subscribers.retain(|tx| tx.send(message.to_string()).is_ok());
        if subscribers.len() != before {
            debug!(
                removed = before - subscribers.len(),
                remaining = subscribers.len(),
                "ui subscribers dropped"
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("ui subscribers poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let hub = UiHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.broadcast("hello");
        assert_eq!(a.recv().await.as_deref(), Some("hello"));
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_dead_subscriber_removed_on_broadcast() {
        let hub = UiHub::new();
        let rx = hub.subscribe();
        let mut live = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(rx);
        hub.broadcast("ping");
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(live.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_broadcast_with_no_subscribers_is_noop() {
        let hub = UiHub::new();
        hub.broadcast("nobody home");
        assert_eq!(hub.subscriber_count(), 0);
    }
}
