//! Event Publisher (Component I, §4.I). A single `tokio::sync::broadcast`
//! channel per topic family, matching the event-fanout pattern the
//! library-automation sibling example uses for its media queue service.
//! Delivery is at-most-once per subscriber; a subscriber that falls more
//! than `backlog` events behind is told so via `RecvError::Lagged` rather
//! than blocking the publisher, and must treat the durable store as
//! authoritative on reconnection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{DownloadQueueItem, DownloadStatus};

const DEFAULT_BACKLOG: usize = 256;

/// One event on the wire. `topic` is carried explicitly (rather than only
/// implied by the variant) so a single subscriber can filter without
/// matching on the payload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum Event {
    DownloadAdded {
        item: DownloadQueueItem,
    },
    DownloadProgress {
        id: Uuid,
        progress_percentage: u8,
    },
    DownloadStatusChanged {
        id: Uuid,
        from: DownloadStatus,
        to: DownloadStatus,
        at: DateTime<Utc>,
    },
    DownloadCompleted {
        id: Uuid,
        download_path: Option<String>,
    },
    QueueUpdated {
        affected: u64,
    },
    SearchCompleted {
        user_id: Uuid,
        query: String,
        results_count: usize,
        search_duration_ms: u64,
    },
}

/// Single owned broadcast hub, wired through the container (§9 "no
/// module-level singletons").
pub struct EventPublisher {
    sender: broadcast::Sender<Event>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_backlog(DEFAULT_BACKLOG)
    }

    pub fn with_backlog(backlog: usize) -> Self {
        let (sender, _) = broadcast::channel(backlog.max(1));
        Self { sender }
    }

    /// Publish to every current subscriber. Returns the number of
    /// subscribers that received it; `0` (no receivers) is not an error —
    /// a search or download can complete with nobody watching.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish(Event::QueueUpdated { affected: 3 });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::QueueUpdated { affected: 3 }));
    }

    #[tokio::test]
    async fn test_slow_subscriber_gets_lagged_signal() {
        let publisher = EventPublisher::with_backlog(2);
        let mut rx = publisher.subscribe();
        for _ in 0..5 {
            publisher.publish(Event::QueueUpdated { affected: 1 });
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_does_not_panic() {
        let publisher = EventPublisher::new();
        let delivered = publisher.publish(Event::QueueUpdated { affected: 1 });
        assert_eq!(delivered, 0);
    }
}
