//! Best-effort event broadcast to long-lived UI listeners.
//!
//! Publishing never fails from the caller's point of view: when nothing is
//! subscribed the event is dropped and logged at trace level. Lagging
//! subscribers lose the oldest events and are expected to recover through
//! the polling snapshot.

mod event;

pub use event::{Event, ProgressSnapshot};

use tokio::sync::broadcast;
use tracing::trace;

/// Default number of buffered events per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

/// Publish side of the broadcast bus.
pub trait Broadcaster: Send + Sync {
    /// Publishes an event to every current listener, if any.
    fn publish(&self, event: Event);
}

/// Broadcast bus backed by a `tokio` broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus with the given per-subscriber buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Attaches a new listener. Events published before this call are not seen.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of currently attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster for EventBus {
    fn publish(&self, event: Event) {
        let action = event.action();
        match self.sender.send(event) {
            Ok(listeners) => trace!(action, listeners, "event published"),
            Err(_) => trace!(action, "no listeners attached; event dropped"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_listeners_is_silent() {
        let bus = EventBus::default();
        bus.publish(Event::DownloadCompleted {
            id: "1".to_string(),
            degraded: false,
        });
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_every_listener_receives_event() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Event::DownloadError {
            id: "7".to_string(),
            error: "boom".to_string(),
            source_url: "https://x/a.mp4".to_string(),
        });

        for receiver in [&mut first, &mut second] {
            let event = receiver.recv().await.unwrap();
            assert_eq!(event.action(), "downloadError");
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::new(8);
        let mut early = bus.subscribe();
        bus.publish(Event::DownloadCompleted {
            id: "a".to_string(),
            degraded: false,
        });
        let mut late = bus.subscribe();
        bus.publish(Event::DownloadCompleted {
            id: "b".to_string(),
            degraded: true,
        });

        assert_eq!(early.recv().await.unwrap().download_id(), Some("a"));
        assert_eq!(late.recv().await.unwrap().download_id(), Some("b"));
    }
}
