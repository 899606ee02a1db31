//! taskdeck Store - Confirmed and Optimistic State
//!
//! Memory-resident containers for the sync engine: the normalized
//! [`EntityStore`], the [`OptimisticLedger`] of in-flight task mutations, the
//! [`ViewProjector`] that merges the two, and [`SyncState`], which owns one
//! lock per entity type. Nothing here performs I/O or decides outcomes.

pub mod entity_store;
pub mod ledger;
pub mod projector;
pub mod state;

pub use entity_store::EntityStore;
pub use ledger::{OptimisticLedger, PendingPatch, SpeculativeTask};
pub use projector::{
    merge, project_users, task_with_optimistic_updates, PendingOp, ProjectedTask,
    ProjectionStats, TaskKey, ViewProjector,
};
pub use state::{SyncState, TaskPartition};
