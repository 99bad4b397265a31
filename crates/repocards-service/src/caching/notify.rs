use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Messages exchanged between contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A context just wrote a fresh cache entry.
    CacheReady,
}

/// A fire-and-forget broadcast between contexts sharing a runtime.
///
/// Delivery is best-effort: publishing without subscribers is a no-op, and a subscriber that
/// falls behind only learns that it missed something.
#[derive(Debug, Clone)]
pub struct NotificationChannel {
    name: Arc<str>,
    sender: broadcast::Sender<Notification>,
}

impl NotificationChannel {
    pub fn new(name: &str) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publish(&self, notification: Notification) {
        // An error only means that nobody is listening right now.
        let receivers = self.sender.send(notification).unwrap_or_default();
        tracing::trace!(channel = %self.name, ?notification, receivers, "Published notification");
    }

    /// Starts listening. Dropping the [`Subscription`] unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }
}

#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    /// Waits for the next notification.
    ///
    /// Returns `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Notification> {
        match self.receiver.recv().await {
            Ok(notification) => Some(notification),
            // Lagging means notifications were sent and there is only one kind of them.
            Err(RecvError::Lagged(_)) => Some(Notification::CacheReady),
            Err(RecvError::Closed) => None,
        }
    }
}
