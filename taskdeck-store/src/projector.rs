//! View projection: confirmed tasks merged with optimistic state, then
//! filtered.
//!
//! Merge steps, in order:
//! 1. confirmed tasks in store order
//! 2. pending creates appended in submission order
//! 3. tasks with a pending delete dropped
//! 4. pending update patches overlaid onto their confirmed task
//! 5. filter criteria applied
//!
//! Pending updates are always overlaid, so an in-flight edit shows up in the
//! aggregate view (and is what the filters see) until it settles. A failed
//! update disappears from the view together with its ledger entry.

use crate::entity_store::EntityStore;
use crate::ledger::OptimisticLedger;
use std::sync::{Mutex, PoisonError};
use taskdeck_core::{Project, ProjectId, Task, TaskFields, TaskFilters, TaskId, TempId, User};

/// How a projected task is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Confirmed(TaskId),
    Temporary(TempId),
}

/// Optimistic work still outstanding for a projected task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    Creating,
    Updating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedTask {
    pub key: TaskKey,
    pub fields: TaskFields,
    pub pending: Option<PendingOp>,
}

impl ProjectedTask {
    pub fn task_id(&self) -> Option<&TaskId> {
        match &self.key {
            TaskKey::Confirmed(id) => Some(id),
            TaskKey::Temporary(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match self.key {
            TaskKey::Temporary(temp_id) => Some(temp_id),
            TaskKey::Confirmed(_) => None,
        }
    }

    pub fn is_speculative(&self) -> bool {
        self.pending.is_some()
    }
}

/// Hit/miss counters for the projection memo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct CachedProjection {
    filters: TaskFilters,
    store_revision: u64,
    ledger_revision: u64,
    view: Vec<ProjectedTask>,
}

/// Computes the task view and memoizes the last result.
///
/// The memo is keyed by the filters plus the store and ledger revisions, so
/// any mutation of either input invalidates it.
#[derive(Debug, Default)]
pub struct ViewProjector {
    cache: Mutex<Option<CachedProjection>>,
    stats: Mutex<ProjectionStats>,
}

impl ViewProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(
        &self,
        store: &EntityStore<Task>,
        ledger: &OptimisticLedger,
        filters: &TaskFilters,
    ) -> Vec<ProjectedTask> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cached) = cache.as_ref() {
            if cached.store_revision == store.revision()
                && cached.ledger_revision == ledger.revision()
                && &cached.filters == filters
            {
                self.record(true);
                return cached.view.clone();
            }
        }

        self.record(false);
        let view = filters.apply(merge(store, ledger), |task| &task.fields);
        *cache = Some(CachedProjection {
            filters: filters.clone(),
            store_revision: store.revision(),
            ledger_revision: ledger.revision(),
            view: view.clone(),
        });
        view
    }

    pub fn stats(&self) -> ProjectionStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, hit: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }
}

/// Unfiltered merge of confirmed and optimistic task state.
pub fn merge(store: &EntityStore<Task>, ledger: &OptimisticLedger) -> Vec<ProjectedTask> {
    let confirmed = store
        .iter()
        .filter(|task| !ledger.is_pending_delete(&task.id))
        .map(|task| match ledger.pending_update(&task.id) {
            Some(patch) => {
                let mut fields = task.fields.clone();
                patch.apply_to(&mut fields);
                ProjectedTask {
                    key: TaskKey::Confirmed(task.id.clone()),
                    fields,
                    pending: Some(PendingOp::Updating),
                }
            }
            None => ProjectedTask {
                key: TaskKey::Confirmed(task.id.clone()),
                fields: task.fields.clone(),
                pending: None,
            },
        });

    let speculative = ledger.pending_creates().iter().map(|entry| ProjectedTask {
        key: TaskKey::Temporary(entry.temp_id),
        fields: entry.fields.clone(),
        pending: Some(PendingOp::Creating),
    });

    confirmed.chain(speculative).collect()
}

/// A confirmed task with its pending patch, if any, applied.
pub fn task_with_optimistic_updates(
    store: &EntityStore<Task>,
    ledger: &OptimisticLedger,
    id: &TaskId,
) -> Option<Task> {
    let task = store.get(id)?;
    Some(match ledger.pending_update(id) {
        Some(patch) => patch.applied(task),
        None => task.clone(),
    })
}

/// Users that belong to `project_id`, in user store order. Unknown projects
/// have no users.
pub fn project_users(
    users: &EntityStore<User>,
    projects: &EntityStore<Project>,
    project_id: &ProjectId,
) -> Vec<User> {
    let Some(project) = projects.get(project_id) else {
        return Vec::new();
    };
    users
        .iter()
        .filter(|user| project.has_member(&user.id))
        .cloned()
        .collect()
}
