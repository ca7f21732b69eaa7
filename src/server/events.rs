//! Status and log notifications for subscribers.
//!
//! The notifier keeps one broadcast channel per event kind. Events are sent
//! while the controller holds its state lock, so every subscriber observes
//! status transitions in the order they were applied. A subscriber that
//! attaches late sees only what happens after it subscribed; the log buffer
//! is the only history.

use crate::server::logs::LogEntry;
use crate::server::{ServerId, ServerStatus};
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Default capacity of each broadcast channel
const CHANNEL_CAPACITY: usize = 256;

/// A server changed status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChanged {
    pub id: ServerId,
    pub status: ServerStatus,
}

/// A batch of log lines was appended to a server's buffer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogAppended {
    pub id: ServerId,
    pub entries: Vec<LogEntry>,
}

/// Publishes controller events to any number of subscribers
#[derive(Clone)]
pub struct EventNotifier {
    status_tx: broadcast::Sender<StatusChanged>,
    log_tx: broadcast::Sender<LogAppended>,
}

impl EventNotifier {
    /// Create a notifier whose channels buffer `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (status_tx, _) = broadcast::channel(capacity);
        let (log_tx, _) = broadcast::channel(capacity);
        Self { status_tx, log_tx }
    }

    pub(crate) fn status_changed(&self, id: ServerId, status: ServerStatus) {
        tracing::debug!(server_id = %id, %status, "Publishing status change");
        // No subscribers is not an error
        let _ = self.status_tx.send(StatusChanged { id, status });
    }

    pub(crate) fn log_appended(&self, id: ServerId, entries: Vec<LogEntry>) {
        if entries.is_empty() {
            return;
        }
        let _ = self.log_tx.send(LogAppended { id, entries });
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> Subscription<StatusChanged> {
        Subscription::new(self.status_tx.subscribe())
    }

    /// Subscribe to log batches
    pub fn subscribe_logs(&self) -> Subscription<LogAppended> {
        Subscription::new(self.log_tx.subscribe())
    }

    /// Number of live status subscribers
    pub fn status_subscriber_count(&self) -> usize {
        self.status_tx.receiver_count()
    }

    /// Number of live log subscribers
    pub fn log_subscriber_count(&self) -> usize {
        self.log_tx.receiver_count()
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

/// A live subscription to one event kind.
///
/// Dropping the subscription, or calling [`Subscription::unsubscribe`],
/// detaches it from the notifier.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    fn new(receiver: broadcast::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the notifier is gone. A subscriber that fell
    /// behind skips the events it missed and continues with the oldest one
    /// still buffered.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, skipping events");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an event if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, skipping events");
                }
                Err(_) => return None,
            }
        }
    }

    /// Converts the subscription into a stream of events
    pub fn into_stream(mut self) -> impl Stream<Item = T> {
        async_stream::stream! {
            while let Some(event) = self.recv().await {
                yield event;
            }
        }
    }

    /// Detaches from the notifier
    pub fn unsubscribe(self) {
        drop(self);
    }
}
