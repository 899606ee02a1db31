//! Shared state container.
//!
//! One lock per entity type. The task partition keeps the task store and the
//! optimistic ledger under the same lock so a settlement can update the store
//! and clear the ledger entry without a reader observing the gap between the
//! two. Users and projects have their own locks, so work on one type never
//! blocks another. Callers must not hold a guard across an `.await`; the
//! closure-based accessors below make that the natural shape.

use crate::entity_store::EntityStore;
use crate::ledger::OptimisticLedger;
use crate::projector::{self, ProjectedTask, ProjectionStats, ViewProjector};
use std::sync::{PoisonError, RwLock};
use taskdeck_core::{Project, ProjectId, Task, TaskFilters, TaskId, TempId, User};

/// Confirmed tasks plus the optimistic ledger that shadows them.
#[derive(Debug, Default)]
pub struct TaskPartition {
    pub store: EntityStore<Task>,
    pub ledger: OptimisticLedger,
}

#[derive(Debug, Default)]
pub struct SyncState {
    tasks: RwLock<TaskPartition>,
    users: RwLock<EntityStore<User>>,
    projects: RwLock<EntityStore<Project>>,
    projector: ViewProjector,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    // === Raw partition access ===

    pub fn read_tasks<R>(&self, f: impl FnOnce(&TaskPartition) -> R) -> R {
        let guard = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write_tasks<R>(&self, f: impl FnOnce(&mut TaskPartition) -> R) -> R {
        let mut guard = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn read_users<R>(&self, f: impl FnOnce(&EntityStore<User>) -> R) -> R {
        let guard = self.users.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write_users<R>(&self, f: impl FnOnce(&mut EntityStore<User>) -> R) -> R {
        let mut guard = self.users.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn read_projects<R>(&self, f: impl FnOnce(&EntityStore<Project>) -> R) -> R {
        let guard = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write_projects<R>(&self, f: impl FnOnce(&mut EntityStore<Project>) -> R) -> R {
        let mut guard = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    // === Views ===

    /// Filtered merged task view.
    pub fn project_tasks(&self, filters: &TaskFilters) -> Vec<ProjectedTask> {
        self.read_tasks(|partition| {
            self.projector
                .project(&partition.store, &partition.ledger, filters)
        })
    }

    pub fn users(&self) -> Vec<User> {
        self.read_users(EntityStore::list)
    }

    pub fn projects(&self) -> Vec<Project> {
        self.read_projects(EntityStore::list)
    }

    pub fn project_users(&self, project_id: &ProjectId) -> Vec<User> {
        self.read_projects(|projects| {
            self.read_users(|users| projector::project_users(users, projects, project_id))
        })
    }

    pub fn task_with_optimistic_updates(&self, id: &TaskId) -> Option<Task> {
        self.read_tasks(|partition| {
            projector::task_with_optimistic_updates(&partition.store, &partition.ledger, id)
        })
    }

    pub fn is_task_being_deleted(&self, id: &TaskId) -> bool {
        self.read_tasks(|partition| partition.ledger.is_pending_delete(id))
    }

    pub fn is_task_being_created(&self, temp_id: TempId) -> bool {
        self.read_tasks(|partition| partition.ledger.is_pending_create(temp_id))
    }

    /// Number of ledger entries still outstanding.
    pub fn pending_count(&self) -> usize {
        self.read_tasks(|partition| partition.ledger.len())
    }

    pub fn projection_stats(&self) -> ProjectionStats {
        self.projector.stats()
    }
}
