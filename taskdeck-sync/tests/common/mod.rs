#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use taskdeck_sync::{Category, SyncEngine, SyncEvent};
use taskdeck_test_utils::MockBackend;
use tokio::sync::broadcast::{self, error::RecvError};

pub fn engine_with(backend: &Arc<MockBackend>) -> SyncEngine {
    SyncEngine::builder(backend.clone()).start()
}

/// Next event matching `pred`. Panics after a minute of (tokio) time.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SyncEvent>, mut pred: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    let next = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), next)
        .await
        .expect("timed out waiting for event")
}

/// Wait until the newest request of `category` has settled.
pub async fn settled(rx: &mut broadcast::Receiver<SyncEvent>, category: Category) {
    wait_for(rx, |event| {
        matches!(
            event,
            SyncEvent::LoadingChanged { category: c, loading: false } if *c == category
        )
    })
    .await;
}

/// Let every runnable task finish its current work.
pub async fn drain() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
