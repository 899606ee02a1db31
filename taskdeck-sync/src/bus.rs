//! Request bus: the caller-facing surface of the engine.
//!
//! Intents go in as [`Command`]s, pass through the ordered stage pipeline and
//! reach the orchestrator. State comes out as [`ViewSnapshot`]s read on
//! demand plus [`SyncEvent`]s pushed to subscribers.

use crate::error::SyncResult;
use crate::events::{EventHub, SyncEvent};
use crate::orchestrator::{MutationOrchestrator, Ticket};
use crate::status::{Category, ErrorSlot, StatusSnapshot, SyncStatus};
use std::sync::Arc;
use taskdeck_core::{
    EntityKind, Project, ProjectId, RequestId, Task, TaskFields, TaskFilters, TaskId, TaskPatch,
    TempId, User,
};
use taskdeck_store::{ProjectedTask, SyncState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reload `kind` from the backend. Filters only apply to tasks.
    Fetch { kind: EntityKind, filters: TaskFilters },
    Create { draft: TaskFields },
    Update { id: TaskId, patch: TaskPatch },
    Delete { id: TaskId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Fetch { .. } => "fetch",
            Command::Create { .. } => "create",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Command::Fetch { kind, .. } => match kind {
                EntityKind::Task => Category::FetchTasks,
                EntityKind::User => Category::FetchUsers,
                EntityKind::Project => Category::FetchProjects,
            },
            Command::Create { .. } => Category::Create,
            Command::Update { .. } => Category::Update,
            Command::Delete { .. } => Category::Delete,
        }
    }
}

/// A step in the command pipeline.
///
/// `process` may rewrite a command or drop it by returning `None`. `observe`
/// sees every published event. Stages must not block.
pub trait BusStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, command: Command) -> Option<Command> {
        Some(command)
    }

    fn observe(&self, _event: &SyncEvent) {}
}

/// Logs commands and events. Never alters or drops anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStage;

impl BusStage for TracingStage {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn process(&self, command: Command) -> Option<Command> {
        match &command {
            Command::Fetch { kind, filters } => {
                info!(command = "fetch", kind = %kind, filtered = !filters.is_unfiltered(), "Command")
            }
            Command::Create { draft } => info!(command = "create", title = %draft.title, "Command"),
            Command::Update { id, .. } => info!(command = "update", id = %id, "Command"),
            Command::Delete { id } => info!(command = "delete", id = %id, "Command"),
        }
        Some(command)
    }

    fn observe(&self, event: &SyncEvent) {
        match event {
            SyncEvent::Failed(failure) => warn!(
                category = %failure.category,
                key = ?failure.key,
                attempts = failure.attempts,
                message = %failure.message,
                "Sync failure"
            ),
            SyncEvent::LoadingChanged { category, loading } => {
                debug!(category = %category, loading, "Loading changed")
            }
            SyncEvent::ViewChanged { kind } => debug!(kind = %kind, "View changed"),
        }
    }
}

/// What happened to a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted(Ticket),
    Dropped { stage: &'static str },
}

impl Dispatch {
    pub fn ticket(&self) -> Option<Ticket> {
        match self {
            Dispatch::Accepted(ticket) => Some(*ticket),
            Dispatch::Dropped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewItems {
    Tasks(Vec<ProjectedTask>),
    Users(Vec<User>),
    Projects(Vec<Project>),
}

/// Point-in-time view of one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub kind: EntityKind,
    pub loading: bool,
    pub error: Option<String>,
    pub items: ViewItems,
}

impl ViewSnapshot {
    pub fn len(&self) -> usize {
        match &self.items {
            ViewItems::Tasks(items) => items.len(),
            ViewItems::Users(items) => items.len(),
            ViewItems::Projects(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tasks(&self) -> Option<&[ProjectedTask]> {
        match &self.items {
            ViewItems::Tasks(items) => Some(items),
            _ => None,
        }
    }
}

pub struct RequestBus {
    stages: Vec<Arc<dyn BusStage>>,
    orchestrator: Arc<MutationOrchestrator>,
    state: Arc<SyncState>,
    status: Arc<SyncStatus>,
    events: EventHub,
}

impl RequestBus {
    pub(crate) fn new(
        stages: Vec<Arc<dyn BusStage>>,
        orchestrator: Arc<MutationOrchestrator>,
        state: Arc<SyncState>,
        status: Arc<SyncStatus>,
        events: EventHub,
    ) -> Self {
        Self {
            stages,
            orchestrator,
            state,
            status,
            events,
        }
    }

    // ========================================================================
    // SUBMIT
    // ========================================================================

    /// Run `command` through the stages and hand it to the orchestrator.
    pub fn dispatch(&self, command: Command) -> SyncResult<Dispatch> {
        let mut command = command;
        for stage in &self.stages {
            match stage.process(command) {
                Some(next) => command = next,
                None => {
                    debug!(stage = stage.name(), "Command dropped by stage");
                    return Ok(Dispatch::Dropped {
                        stage: stage.name(),
                    });
                }
            }
        }
        self.orchestrator.submit(command).map(Dispatch::Accepted)
    }

    pub fn request_fetch(
        &self,
        kind: EntityKind,
        filters: TaskFilters,
    ) -> SyncResult<Option<RequestId>> {
        let dispatch = self.dispatch(Command::Fetch { kind, filters })?;
        Ok(dispatch.ticket().map(|t| t.request_id))
    }

    /// Submit a new task. Returns the temp id of the speculative entry, or
    /// `None` when a stage dropped the command.
    pub fn request_create(&self, draft: TaskFields) -> SyncResult<Option<TempId>> {
        let dispatch = self.dispatch(Command::Create { draft })?;
        Ok(dispatch.ticket().and_then(|t| t.temp_id))
    }

    pub fn request_update(&self, id: TaskId, patch: TaskPatch) -> SyncResult<Option<RequestId>> {
        let dispatch = self.dispatch(Command::Update { id, patch })?;
        Ok(dispatch.ticket().map(|t| t.request_id))
    }

    pub fn request_delete(&self, id: TaskId) -> SyncResult<Option<RequestId>> {
        let dispatch = self.dispatch(Command::Delete { id })?;
        Ok(dispatch.ticket().map(|t| t.request_id))
    }

    // ========================================================================
    // OBSERVE
    // ========================================================================

    pub fn current_view(&self, kind: EntityKind, filters: &TaskFilters) -> ViewSnapshot {
        let (items, slot) = match kind {
            EntityKind::Task => (ViewItems::Tasks(self.state.project_tasks(filters)), ErrorSlot::Tasks),
            EntityKind::User => (ViewItems::Users(self.state.users()), ErrorSlot::Users),
            EntityKind::Project => (ViewItems::Projects(self.state.projects()), ErrorSlot::Projects),
        };
        ViewSnapshot {
            kind,
            loading: self.status.is_kind_loading(kind),
            error: self.status.error(slot),
            items,
        }
    }

    pub fn current_tasks(&self, filters: &TaskFilters) -> Vec<ProjectedTask> {
        self.state.project_tasks(filters)
    }

    pub fn users(&self) -> Vec<User> {
        self.state.users()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.state.projects()
    }

    /// Users assignable to tasks of `project_id`.
    pub fn project_users(&self, project_id: &ProjectId) -> Vec<User> {
        self.state.project_users(project_id)
    }

    pub fn task_with_optimistic_updates(&self, id: &TaskId) -> Option<Task> {
        self.state.task_with_optimistic_updates(id)
    }

    pub fn is_task_being_deleted(&self, id: &TaskId) -> bool {
        self.state.is_task_being_deleted(id)
    }

    pub fn is_task_being_created(&self, temp_id: TempId) -> bool {
        self.state.is_task_being_created(temp_id)
    }

    pub fn is_loading(&self, kind: EntityKind) -> bool {
        self.status.is_kind_loading(kind)
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn error(&self, slot: ErrorSlot) -> Option<String> {
        self.status.error(slot)
    }

    pub fn clear_error(&self, slot: ErrorSlot) -> Option<String> {
        self.status.clear_error(slot)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for RequestBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("RequestBus")
            .field("stages", &stages)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::TaskType;

    #[test]
    fn command_categories() {
        let fetch_users = Command::Fetch {
            kind: EntityKind::User,
            filters: TaskFilters::new(),
        };
        assert_eq!(fetch_users.category(), Category::FetchUsers);
        assert_eq!(fetch_users.name(), "fetch");

        let create = Command::Create {
            draft: TaskFields::new("x", TaskType::Bug),
        };
        assert_eq!(create.category(), Category::Create);
        assert!(create.category().is_mutation());
    }

    #[test]
    fn tracing_stage_passes_commands_through() {
        let command = Command::Delete {
            id: TaskId::new("7"),
        };
        assert_eq!(TracingStage.process(command.clone()), Some(command));
    }
}
