//! Notifications published by the engine.
//!
//! Events fan out over a tokio broadcast channel. Every event is offered to
//! the bus stages first (for logging and similar side channels), then sent to
//! subscribers. Publishing never blocks; slow subscribers lag.

use crate::bus::BusStage;
use crate::status::Category;
use chrono::Utc;
use std::sync::Arc;
use taskdeck_core::{EntityKind, TaskFields, TaskId, TaskPatch, TempId, Timestamp};
use tokio::sync::broadcast;
use tracing::trace;

/// What a terminal failure is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    /// A speculative task that was never confirmed.
    Temp(TempId),
    Entity(TaskId),
    /// Fetches have no entity to point at.
    None,
}

/// The caller's submitted payload, handed back so a form can be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectedPayload {
    Draft(TaskFields),
    Patch(TaskPatch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub category: Category,
    pub key: CorrelationKey,
    pub message: String,
    pub payload: Option<RejectedPayload>,
    pub attempts: u32,
    pub occurred_at: Timestamp,
}

impl Failure {
    pub fn new(category: Category, key: CorrelationKey, message: impl Into<String>) -> Self {
        Self {
            category,
            key,
            message: message.into(),
            payload: None,
            attempts: 0,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: RejectedPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The projected view for `kind` may have changed.
    ViewChanged { kind: EntityKind },
    LoadingChanged { category: Category, loading: bool },
    Failed(Failure),
}

impl SyncEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SyncEvent::ViewChanged { .. } => "view_changed",
            SyncEvent::LoadingChanged { .. } => "loading_changed",
            SyncEvent::Failed(_) => "failed",
        }
    }
}

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<SyncEvent>,
    observers: Arc<[Arc<dyn BusStage>]>,
}

impl EventHub {
    pub fn new(capacity: usize, observers: Vec<Arc<dyn BusStage>>) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            observers: observers.into(),
        }
    }

    pub fn publish(&self, event: SyncEvent) {
        for stage in self.observers.iter() {
            stage.observe(&event);
        }
        let event_type = event.event_type();
        match self.tx.send(event) {
            Ok(receivers) => trace!(event_type, receivers, "Published sync event"),
            Err(_) => trace!(event_type, "No subscribers for sync event"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.tx.receiver_count())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Command;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    impl BusStage for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn process(&self, command: Command) -> Option<Command> {
            Some(command)
        }

        fn observe(&self, event: &SyncEvent) {
            self.0.lock().unwrap().push(event.event_type());
        }
    }

    #[tokio::test]
    async fn observers_see_events_before_subscribers() {
        let recorder = Arc::new(Recorder::default());
        let hub = EventHub::new(8, vec![recorder.clone()]);
        let mut rx = hub.subscribe();

        hub.publish(SyncEvent::ViewChanged {
            kind: EntityKind::Task,
        });

        assert_eq!(*recorder.0.lock().unwrap(), vec!["view_changed"]);
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::ViewChanged {
                kind: EntityKind::Task
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new(1, Vec::new());
        hub.publish(SyncEvent::LoadingChanged {
            category: Category::Create,
            loading: true,
        });
        assert_eq!(hub.subscriber_count(), 0);
    }
}
