use std::sync::Mutex;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    DownloadGrabbed,
    DownloadProgress,
    DownloadCompleted,
    DownloadFailed,
    ImportStarted,
    ImportCompleted,
    ImportFailed,
    PlexItemDetected,
    PlexVerificationTimedOut,
}

pub const ALL_KINDS: &[EventKind] = &[
    EventKind::DownloadGrabbed,
    EventKind::DownloadProgress,
    EventKind::DownloadCompleted,
    EventKind::DownloadFailed,
    EventKind::ImportStarted,
    EventKind::ImportCompleted,
    EventKind::ImportFailed,
    EventKind::PlexItemDetected,
    EventKind::PlexVerificationTimedOut,
];

/// Typed domain events flowing between the lifecycle components.
#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    DownloadGrabbed {
        download_id: i64,
        content_id: i64,
        release_name: String,
        indexer: String,
    },
    DownloadProgress {
        download_id: i64,
        content_id: i64,
        progress: f32,
        speed_bps: u64,
        eta_secs: Option<u64>,
    },
    DownloadCompleted {
        download_id: i64,
        content_id: i64,
        path: String,
    },
    DownloadFailed {
        download_id: i64,
        content_id: i64,
        reason: String,
    },
    ImportStarted {
        download_id: i64,
        content_id: i64,
    },
    ImportCompleted {
        download_id: i64,
        content_id: i64,
        file_path: String,
    },
    ImportFailed {
        download_id: i64,
        content_id: i64,
        reason: String,
    },
    PlexItemDetected {
        content_id: i64,
        rating_key: String,
    },
    PlexVerificationTimedOut {
        content_id: i64,
        download_id: i64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DownloadGrabbed { .. } => EventKind::DownloadGrabbed,
            EventPayload::DownloadProgress { .. } => EventKind::DownloadProgress,
            EventPayload::DownloadCompleted { .. } => EventKind::DownloadCompleted,
            EventPayload::DownloadFailed { .. } => EventKind::DownloadFailed,
            EventPayload::ImportStarted { .. } => EventKind::ImportStarted,
            EventPayload::ImportCompleted { .. } => EventKind::ImportCompleted,
            EventPayload::ImportFailed { .. } => EventKind::ImportFailed,
            EventPayload::PlexItemDetected { .. } => EventKind::PlexItemDetected,
            EventPayload::PlexVerificationTimedOut { .. } => EventKind::PlexVerificationTimedOut,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
pub struct Event {
    #[schema(value_type = String)]
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug)]
struct Subscriber {
    id: Uuid,
    kinds: Vec<EventKind>,
    tx: mpsc::Sender<Event>,
    dropped: u64,
}

/// In-process pub/sub bus.
///
/// Publishing never blocks: each subscriber has its own bounded queue and a
/// full queue drops the event for that subscriber only. Per-subscriber
/// delivery order is publish order. A dropped receiver unsubscribes itself
/// on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kinds: &[EventKind], capacity: usize) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            kinds: kinds.to_vec(),
            tx,
            dropped: 0,
        };
        tracing::debug!(subscriber = %subscriber.id, ?kinds, "New event subscriber");
        self.subscribers.lock().unwrap().push(subscriber);
        rx
    }

    pub fn publish(&self, payload: EventPayload) {
        let event = Event {
            timestamp: OffsetDateTime::now_utc(),
            payload,
        };
        let kind = event.payload.kind();
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter_mut() {
            if !subscriber.kinds.contains(&kind) {
                continue;
            }
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    subscriber.dropped += 1;
                    tracing::warn!(
                        subscriber = %subscriber.id,
                        ?kind,
                        total_dropped = subscriber.dropped,
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grabbed(download_id: i64) -> EventPayload {
        EventPayload::DownloadGrabbed {
            download_id,
            content_id: 1,
            release_name: "Test.Movie.2024.1080p-X".into(),
            indexer: "nzbhub".into(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn subscribers_only_see_their_kinds() {
        let bus = EventBus::new();
        let mut grabs = bus.subscribe(&[EventKind::DownloadGrabbed], 8);
        let mut completions = bus.subscribe(&[EventKind::DownloadCompleted], 8);

        bus.publish(grabbed(1));
        bus.publish(EventPayload::DownloadCompleted {
            download_id: 1,
            content_id: 1,
            path: "/dl/complete".into(),
        });

        let event = grabs.recv().await.unwrap();
        assert_eq!(EventKind::DownloadGrabbed, event.payload.kind());
        let event = completions.recv().await.unwrap();
        assert_eq!(EventKind::DownloadCompleted, event.payload.kind());
        assert!(grabs.try_recv().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn publish_order_is_preserved_per_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[EventKind::DownloadGrabbed], 16);
        for i in 0..10 {
            bus.publish(grabbed(i));
        }
        for i in 0..10 {
            let event = rx.recv().await.unwrap();
            let EventPayload::DownloadGrabbed { download_id, .. } = event.payload else {
                panic!("wrong kind");
            };
            assert_eq!(i, download_id);
        }
    }

    #[test_log::test(tokio::test)]
    async fn full_subscriber_drops_without_blocking_others() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe(&[EventKind::DownloadGrabbed], 1);
        let mut fast = bus.subscribe(&[EventKind::DownloadGrabbed], 16);

        for i in 0..5 {
            bus.publish(grabbed(i));
        }
        // The slow queue kept only the first event.
        assert_eq!(
            EventKind::DownloadGrabbed,
            slow.recv().await.unwrap().payload.kind()
        );
        assert!(slow.try_recv().is_err());
        // The fast one got all five.
        for _ in 0..5 {
            fast.recv().await.unwrap();
        }
    }

    #[test_log::test(tokio::test)]
    async fn dropped_receiver_is_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(&[EventKind::DownloadGrabbed], 4);
        drop(rx);
        bus.publish(grabbed(1));
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }
}
