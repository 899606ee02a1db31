//! taskdeck Test Utilities
//!
//! Shared test infrastructure for the taskdeck workspace:
//! - A scripted in-memory backend
//! - Proptest generators for entities, patches and filters
//! - Fixtures for common scenarios
//! - Assertions over the store, ledger and projected views

pub use taskdeck_core::{
    BackendError, BackendResult, Deleted, EntityKind, Priority, Project, ProjectId, Selection,
    Subtask, Task, TaskBackend, TaskFields, TaskFilters, TaskId, TaskPatch, TaskStatus, TaskType,
    TempId, User, UserId,
};
pub use taskdeck_store::{ProjectedTask, SyncState, TaskKey};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

// ============================================================================
// MOCK BACKEND
// ============================================================================

/// Backend call kinds, used to script and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    FetchTasks,
    FetchUsers,
    FetchProjects,
    CreateTask,
    UpdateTask,
    DeleteTask,
}

/// Holds one scripted call in flight until opened or dropped.
#[derive(Debug)]
pub struct Gate {
    tx: Option<oneshot::Sender<()>>,
}

impl Gate {
    pub fn open(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug, Default)]
struct MockInner {
    tasks: Vec<Task>,
    users: Vec<User>,
    projects: Vec<Project>,
    next_id: u64,
    failures: HashMap<MockOp, VecDeque<BackendError>>,
    holds: HashMap<MockOp, VecDeque<oneshot::Receiver<()>>>,
    calls: HashMap<MockOp, Vec<Instant>>,
}

/// In-memory task service with per-call scripting.
///
/// Calls behave like a small server over the seeded data unless a failure or
/// a hold has been queued for that call kind. Scripts are consumed one per
/// call, in order. Created tasks get ids `srv-1`, `srv-2`, ...
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(self, tasks: Vec<Task>) -> Self {
        self.lock().tasks = tasks;
        self
    }

    pub fn with_users(self, users: Vec<User>) -> Self {
        self.lock().users = users;
        self
    }

    pub fn with_projects(self, projects: Vec<Project>) -> Self {
        self.lock().projects = projects;
        self
    }

    /// Fail the next call of `op` with `error`.
    pub fn fail_next(&self, op: MockOp, error: BackendError) {
        self.fail_times(op, 1, error);
    }

    pub fn fail_times(&self, op: MockOp, times: usize, error: BackendError) {
        let mut inner = self.lock();
        let queue = inner.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Hold the next call of `op` until the returned gate is opened.
    pub fn hold_next(&self, op: MockOp) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.lock().holds.entry(op).or_default().push_back(rx);
        Gate { tx: Some(tx) }
    }

    pub fn calls(&self, op: MockOp) -> usize {
        self.lock().calls.get(&op).map_or(0, Vec::len)
    }

    /// When each call of `op` started, on the tokio clock.
    pub fn call_times(&self, op: MockOp) -> Vec<Instant> {
        self.lock().calls.get(&op).cloned().unwrap_or_default()
    }

    /// Server-side task data.
    pub fn server_tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, op: MockOp) -> BackendResult<()> {
        let hold = {
            let mut inner = self.lock();
            inner.calls.entry(op).or_default().push(Instant::now());
            inner.holds.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(rx) = hold {
            // A dropped gate releases the call as well.
            let _ = rx.await;
        }
        let failure = self.lock().failures.get_mut(&op).and_then(VecDeque::pop_front);
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskBackend for MockBackend {
    async fn fetch_tasks(&self, filters: &TaskFilters) -> BackendResult<Vec<Task>> {
        self.enter(MockOp::FetchTasks).await?;
        let tasks = self.lock().tasks.clone();
        Ok(filters.apply(tasks, |t| &t.fields))
    }

    async fn fetch_users(&self) -> BackendResult<Vec<User>> {
        self.enter(MockOp::FetchUsers).await?;
        Ok(self.lock().users.clone())
    }

    async fn fetch_projects(&self) -> BackendResult<Vec<Project>> {
        self.enter(MockOp::FetchProjects).await?;
        Ok(self.lock().projects.clone())
    }

    async fn create_task(&self, draft: &TaskFields) -> BackendResult<Task> {
        self.enter(MockOp::CreateTask).await?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let task = Task::new(format!("srv-{}", inner.next_id), draft.clone());
        inner.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> BackendResult<Task> {
        self.enter(MockOp::UpdateTask).await?;
        let mut inner = self.lock();
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| BackendError::rejected(format!("task {} not found", id)))?;
        patch.apply_to(&mut task.fields);
        Ok(task.clone())
    }

    async fn delete_task(&self, id: &TaskId) -> BackendResult<Deleted> {
        self.enter(MockOp::DeleteTask).await?;
        let mut inner = self.lock();
        let index = inner
            .tasks
            .iter()
            .position(|t| &t.id == id)
            .ok_or_else(|| BackendError::rejected(format!("task {} not found", id)))?;
        inner.tasks.remove(index);
        Ok(Deleted { id: id.clone() })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for taskdeck entity types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_task_type() -> impl Strategy<Value = TaskType> {
        prop::sample::select(TaskType::all().to_vec())
    }

    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop::sample::select(Priority::all().to_vec())
    }

    pub fn arb_status() -> impl Strategy<Value = TaskStatus> {
        prop::sample::select(TaskStatus::all().to_vec())
    }

    /// Small id alphabet so filters hit often.
    pub fn arb_project_id() -> impl Strategy<Value = ProjectId> {
        "p[1-3]".prop_map(ProjectId::new)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        "u[1-3]".prop_map(UserId::new)
    }

    pub fn arb_task_fields() -> impl Strategy<Value = TaskFields> {
        (
            "(Fix|Add|Investigate|Refactor) (bug|login|parser|docs)",
            prop::option::of("[a-z ]{0,20}"),
            arb_task_type(),
            arb_priority(),
            arb_status(),
            prop::option::of(arb_project_id()),
            prop::option::of(arb_user_id()),
        )
            .prop_map(
                |(title, description, task_type, priority, status, project_id, assignee_id)| {
                    let mut fields = TaskFields::new(title, task_type)
                        .with_priority(priority)
                        .with_status(status);
                    fields.description = description;
                    fields.project_id = project_id;
                    fields.assignee_id = assignee_id;
                    fields
                },
            )
    }

    /// Tasks with distinct ids `t0`, `t1`, ...
    pub fn arb_tasks(max: usize) -> impl Strategy<Value = Vec<Task>> {
        prop::collection::vec(arb_task_fields(), 0..max).prop_map(|fields| {
            fields
                .into_iter()
                .enumerate()
                .map(|(i, f)| Task::new(format!("t{}", i), f))
                .collect()
        })
    }

    pub fn arb_patch() -> impl Strategy<Value = TaskPatch> {
        (
            prop::option::of("[A-Z][a-z]{2,8}"),
            prop::option::of(arb_status()),
            prop::option::of(arb_priority()),
            prop::option::of(prop::option::of(arb_user_id())),
        )
            .prop_map(|(title, status, priority, assignee)| TaskPatch {
                title,
                status,
                priority,
                assignee_id: assignee,
                ..TaskPatch::default()
            })
    }

    pub fn arb_filters() -> impl Strategy<Value = TaskFilters> {
        (
            prop::option::of(arb_project_id()),
            prop::option::of(arb_user_id()),
            prop::option::of(arb_status()),
            prop::option::of(arb_task_type()),
            prop::sample::select(vec!["", "bug", "LOGIN", "fix"]),
        )
            .prop_map(|(project_id, assignee_id, status, task_type, search)| TaskFilters {
                project_id,
                assignee_id,
                status: status.map_or(Selection::All, Selection::Only),
                task_type: task_type.map_or(Selection::All, Selection::Only),
                search: search.to_string(),
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built entities for common scenarios.

    use super::*;

    /// `{ id: "1", title: "Fix bug", status: Todo }`
    pub fn fix_bug_task() -> Task {
        Task::new(
            "1",
            TaskFields::new("Fix bug", TaskType::Bug).with_status(TaskStatus::Todo),
        )
    }

    pub fn draft(title: &str) -> TaskFields {
        TaskFields::new(title, TaskType::Feature)
    }

    pub fn sample_tasks() -> Vec<Task> {
        vec![
            fix_bug_task(),
            Task::new(
                "2",
                TaskFields::new("Add login page", TaskType::Feature)
                    .with_project("p1")
                    .with_assignee("u1")
                    .with_status(TaskStatus::InProgress),
            ),
            Task::new(
                "3",
                TaskFields::new("Investigate flaky CI", TaskType::Research)
                    .with_project("p2")
                    .with_status(TaskStatus::Done),
            ),
        ]
    }

    pub fn sample_users() -> Vec<User> {
        vec![
            User::new("u1", "Ada"),
            User::new("u2", "Linus"),
            User::new("u3", "Grace"),
        ]
    }

    pub fn sample_projects() -> Vec<Project> {
        vec![
            Project::new("p1", "Web").with_member("u1").with_member("u2"),
            Project::new("p2", "Infra").with_member("u3"),
        ]
    }

    /// A mock backend seeded with all sample data.
    pub fn seeded_backend() -> MockBackend {
        MockBackend::new()
            .with_tasks(sample_tasks())
            .with_users(sample_users())
            .with_projects(sample_projects())
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for sync state.

    use super::*;

    /// Identifier of a projected entry: the task id, or the temp id string.
    pub fn view_key(task: &ProjectedTask) -> String {
        match &task.key {
            TaskKey::Confirmed(id) => id.to_string(),
            TaskKey::Temporary(temp_id) => temp_id.to_string(),
        }
    }

    pub fn assert_view_keys(view: &[ProjectedTask], expected: &[&str]) {
        let keys: Vec<String> = view.iter().map(view_key).collect();
        assert_eq!(keys, expected, "Unexpected projected view");
    }

    pub fn assert_ledger_empty(state: &SyncState) {
        assert_eq!(
            state.pending_count(),
            0,
            "Expected no outstanding ledger entries"
        );
    }

    pub fn assert_transient<T: std::fmt::Debug>(result: &BackendResult<T>) {
        assert!(
            matches!(result, Err(BackendError::Transient(_))),
            "Expected transient error, got {:?}",
            result
        );
    }

    pub fn assert_rejected<T: std::fmt::Debug>(result: &BackendResult<T>) {
        assert!(
            matches!(result, Err(BackendError::Rejected(_))),
            "Expected rejection, got {:?}",
            result
        );
    }
}
