//! Engine lifecycle: wiring, startup and shutdown.

use crate::bus::{BusStage, RequestBus, TracingStage};
use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::EventHub;
use crate::orchestrator::MutationOrchestrator;
use crate::rest::RestBackend;
use crate::retry::RetryPolicy;
use crate::status::SyncStatus;
use std::sync::Arc;
use taskdeck_core::TaskBackend;
use taskdeck_store::SyncState;
use tracing::info;

const DEFAULT_EVENT_CAPACITY: usize = 256;

pub struct SyncEngineBuilder {
    backend: Arc<dyn TaskBackend>,
    policy: RetryPolicy,
    event_capacity: usize,
    stages: Vec<Arc<dyn BusStage>>,
}

impl SyncEngineBuilder {
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Append a stage after the ones already registered.
    pub fn stage(mut self, stage: impl BusStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Spawn the category workers. Must run inside a tokio runtime.
    pub fn start(self) -> SyncEngine {
        let state = Arc::new(SyncState::new());
        let status = Arc::new(SyncStatus::new());
        let events = EventHub::new(self.event_capacity, self.stages.clone());
        let orchestrator = Arc::new(MutationOrchestrator::spawn(
            Arc::clone(&state),
            self.backend,
            self.policy,
            Arc::clone(&status),
            events.clone(),
        ));
        let bus = RequestBus::new(
            self.stages,
            Arc::clone(&orchestrator),
            Arc::clone(&state),
            status,
            events,
        );

        info!(
            max_attempts = self.policy.max_attempts(),
            event_capacity = self.event_capacity,
            "Sync engine started"
        );
        SyncEngine {
            state,
            orchestrator,
            bus,
        }
    }
}

/// Owns the shared state and the workers. Callers interact through
/// [`SyncEngine::bus`].
#[derive(Debug)]
pub struct SyncEngine {
    state: Arc<SyncState>,
    orchestrator: Arc<MutationOrchestrator>,
    bus: RequestBus,
}

impl SyncEngine {
    /// Builder with the default retry policy and a [`TracingStage`].
    pub fn builder(backend: Arc<dyn TaskBackend>) -> SyncEngineBuilder {
        SyncEngineBuilder {
            backend,
            policy: RetryPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            stages: vec![Arc::new(TracingStage)],
        }
    }

    /// Validate `config` and start an engine against the REST backend.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        let backend = RestBackend::new(config)?;
        Ok(Self::builder(Arc::new(backend))
            .retry_policy(RetryPolicy::from_config(&config.retry))
            .event_capacity(config.events.capacity)
            .start())
    }

    pub fn bus(&self) -> &RequestBus {
        &self.bus
    }

    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.orchestrator.policy()
    }

    /// Stop accepting commands and wait for in-flight requests to settle.
    /// Later submissions fail with [`SyncError::EngineClosed`].
    ///
    /// [`SyncError::EngineClosed`]: crate::SyncError::EngineClosed
    pub async fn shutdown(&self) {
        info!("Sync engine shutting down");
        self.orchestrator.shutdown().await;
        info!(pending = self.state.pending_count(), "Sync engine stopped");
    }
}
