//! taskdeck Sync - Optimistic State Synchronization
//!
//! Keeps a normalized task/user/project cache usable while mutations are in
//! flight against an unreliable backend:
//!
//! - mutations show up in the view the moment they are submitted
//! - transient failures are retried with linear backoff
//! - confirmed results replace speculative state exactly once
//! - only the newest request per category is honored
//!
//! Start a [`SyncEngine`], talk to it through its [`RequestBus`], and
//! subscribe to [`SyncEvent`]s for change notifications.

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod rest;
pub mod retry;
pub mod status;
pub mod telemetry;

pub use bus::{BusStage, Command, Dispatch, RequestBus, TracingStage, ViewItems, ViewSnapshot};
pub use config::{
    AuthConfig, ConfigError, EventsConfig, LogFormat, LoggingConfig, RetryConfig, SyncConfig,
};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{CorrelationKey, EventHub, Failure, RejectedPayload, SyncEvent};
pub use orchestrator::{Job, JobPayload, JobState, MutationOrchestrator, Ticket};
pub use rest::RestBackend;
pub use retry::RetryPolicy;
pub use status::{Category, ErrorSlot, StatusSnapshot, SyncStatus};
pub use telemetry::init_tracing;
