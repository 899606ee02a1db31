mod common;

use common::{drain, engine_with, settled, wait_for};
use std::sync::Arc;
use std::time::Duration;
use taskdeck_core::{
    BackendError, EntityKind, ProjectId, TaskFilters, TaskId, TaskPatch, TaskStatus,
};
use taskdeck_store::{PendingOp, TaskKey};
use taskdeck_sync::{
    BusStage, Category, Command, CorrelationKey, ErrorSlot, RejectedPayload, SyncEngine,
    SyncError, SyncEvent,
};
use taskdeck_test_utils::assertions::{assert_ledger_empty, assert_view_keys};
use taskdeck_test_utils::fixtures::{draft, fix_bug_task, sample_tasks, seeded_backend};
use taskdeck_test_utils::{MockBackend, MockOp};

fn all() -> TaskFilters {
    TaskFilters::new()
}

fn failures(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> usize {
    let mut count = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, SyncEvent::Failed(_)) {
            count += 1;
        }
    }
    count
}

async fn loaded(backend: &Arc<MockBackend>) -> SyncEngine {
    let engine = engine_with(backend);
    let mut rx = engine.bus().subscribe();
    engine.bus().request_fetch(EntityKind::Task, all()).unwrap();
    settled(&mut rx, Category::FetchTasks).await;
    engine
}

// ============================================================================
// CREATE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn create_shows_temp_entry_then_server_task_exactly_once() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    let gate = backend.hold_next(MockOp::CreateTask);
    let temp_id = bus.request_create(draft("Write tests")).unwrap().unwrap();

    let view = bus.current_tasks(&all());
    assert_eq!(view.len(), 4);
    let last = &view[3];
    assert_eq!(last.key, TaskKey::Temporary(temp_id));
    assert_eq!(last.pending, Some(PendingOp::Creating));
    assert_eq!(last.fields.title, "Write tests");
    assert!(bus.is_task_being_created(temp_id));

    gate.open();
    settled(&mut rx, Category::Create).await;

    let view = bus.current_tasks(&all());
    assert_view_keys(&view, &["1", "2", "3", "srv-1"]);
    assert!(!bus.is_task_being_created(temp_id));
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn failed_create_drops_temp_entry_and_returns_draft() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    backend.fail_next(MockOp::CreateTask, BackendError::rejected("title taken"));
    let temp_id = bus.request_create(draft("Dup")).unwrap().unwrap();

    let event = wait_for(&mut rx, |e| matches!(e, SyncEvent::Failed(_))).await;
    let SyncEvent::Failed(failure) = event else {
        unreachable!()
    };
    assert_eq!(failure.category, Category::Create);
    assert_eq!(failure.key, CorrelationKey::Temp(temp_id));
    assert_eq!(failure.payload, Some(RejectedPayload::Draft(draft("Dup"))));
    assert_eq!(failure.attempts, 1);
    assert_eq!(backend.calls(MockOp::CreateTask), 1);

    settled(&mut rx, Category::Create).await;
    assert_view_keys(&bus.current_tasks(&all()), &["1", "2", "3"]);
    assert_eq!(bus.error(ErrorSlot::Form).as_deref(), Some("title taken"));
    assert_ledger_empty(engine.state());

    bus.clear_error(ErrorSlot::Form);
    assert!(bus.error(ErrorSlot::Form).is_none());
}

// ============================================================================
// UPDATE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn update_is_visible_immediately_and_replaced_by_server_version() {
    let backend = Arc::new(MockBackend::new().with_tasks(vec![fix_bug_task()]));
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let id = TaskId::new("1");

    let gate = backend.hold_next(MockOp::UpdateTask);
    bus.request_update(id.clone(), TaskPatch::new().status(TaskStatus::Done))
        .unwrap();

    let view = bus.current_tasks(&all());
    assert_eq!(view[0].fields.status, TaskStatus::Done);
    assert_eq!(view[0].pending, Some(PendingOp::Updating));
    let done = bus.current_tasks(&all().with_status(TaskStatus::Done));
    assert_view_keys(&done, &["1"]);
    assert_eq!(
        bus.task_with_optimistic_updates(&id).unwrap().fields.status,
        TaskStatus::Done
    );

    gate.open();
    settled(&mut rx, Category::Update).await;

    let view = bus.current_tasks(&all());
    assert_eq!(view[0].fields.status, TaskStatus::Done);
    assert_eq!(view[0].pending, None);
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn failed_update_reverts_and_returns_patch() {
    let backend = Arc::new(MockBackend::new().with_tasks(vec![fix_bug_task()]));
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let patch = TaskPatch::new().status(TaskStatus::Done);

    backend.fail_next(MockOp::UpdateTask, BackendError::rejected("locked"));
    bus.request_update(TaskId::new("1"), patch.clone()).unwrap();

    let SyncEvent::Failed(failure) =
        wait_for(&mut rx, |e| matches!(e, SyncEvent::Failed(_))).await
    else {
        unreachable!()
    };
    assert_eq!(failure.key, CorrelationKey::Entity(TaskId::new("1")));
    assert_eq!(failure.payload, Some(RejectedPayload::Patch(patch)));

    settled(&mut rx, Category::Update).await;
    let view = bus.current_tasks(&all());
    assert_eq!(view[0].fields.status, TaskStatus::Todo);
    assert_eq!(view[0].pending, None);
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn superseded_update_keeps_newer_overlay() {
    let backend = Arc::new(MockBackend::new().with_tasks(vec![fix_bug_task()]));
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let id = TaskId::new("1");

    let first = backend.hold_next(MockOp::UpdateTask);
    let second = backend.hold_next(MockOp::UpdateTask);
    bus.request_update(id.clone(), TaskPatch::new().title("First"))
        .unwrap();
    bus.request_update(id.clone(), TaskPatch::new().title("Second"))
        .unwrap();
    assert_eq!(bus.current_tasks(&all())[0].fields.title, "Second");

    // The older request finishing must not disturb the newer overlay.
    first.open();
    drain().await;
    assert_eq!(bus.current_tasks(&all())[0].fields.title, "Second");
    assert_eq!(engine.state().pending_count(), 1);

    second.open();
    settled(&mut rx, Category::Update).await;
    let view = bus.current_tasks(&all());
    assert_eq!(view[0].fields.title, "Second");
    assert_eq!(view[0].pending, None);
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn superseded_create_is_dropped_without_touching_store() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let mut all_events = bus.subscribe();

    let first = backend.hold_next(MockOp::CreateTask);
    let second = backend.hold_next(MockOp::CreateTask);
    let older = bus.request_create(draft("Older")).unwrap().unwrap();
    let newer = bus.request_create(draft("Newer")).unwrap().unwrap();
    assert_eq!(bus.current_tasks(&all()).len(), 5);

    second.open();
    settled(&mut rx, Category::Create).await;
    let older_key = older.to_string();
    assert_view_keys(
        &bus.current_tasks(&all()),
        &["1", "2", "3", "srv-1", older_key.as_str()],
    );
    assert!(!bus.is_task_being_created(newer));

    // The server accepts the older draft, but its result is discarded.
    first.open();
    drain().await;
    assert_view_keys(&bus.current_tasks(&all()), &["1", "2", "3", "srv-1"]);
    assert!(!bus.is_task_being_created(older));
    assert!(engine
        .state()
        .read_tasks(|p| p.store.iter().all(|t| t.fields.title != "Older")));
    assert!(backend
        .server_tasks()
        .iter()
        .any(|t| t.fields.title == "Older"));
    assert_eq!(failures(&mut all_events), 0);
    assert!(bus.error(ErrorSlot::Form).is_none());
    assert_ledger_empty(engine.state());
}

// ============================================================================
// DELETE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn delete_hides_immediately_and_restores_on_failure() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let id = TaskId::new("2");

    let gate = backend.hold_next(MockOp::DeleteTask);
    backend.fail_next(MockOp::DeleteTask, BackendError::rejected("forbidden"));
    bus.request_delete(id.clone()).unwrap();

    assert_view_keys(&bus.current_tasks(&all()), &["1", "3"]);
    assert!(bus.is_task_being_deleted(&id));

    gate.open();
    settled(&mut rx, Category::Delete).await;

    assert_view_keys(&bus.current_tasks(&all()), &["1", "2", "3"]);
    assert!(!bus.is_task_being_deleted(&id));
    assert_eq!(bus.error(ErrorSlot::Tasks).as_deref(), Some("forbidden"));
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn successful_delete_removes_from_store() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    bus.request_delete(TaskId::new("2")).unwrap();
    settled(&mut rx, Category::Delete).await;

    assert_view_keys(&bus.current_tasks(&all()), &["1", "3"]);
    assert!(engine
        .state()
        .read_tasks(|p| !p.store.contains(&TaskId::new("2"))));
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn superseded_delete_makes_task_visible_again() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();
    let mut all_events = bus.subscribe();
    let older = TaskId::new("2");
    let newer = TaskId::new("3");

    let first = backend.hold_next(MockOp::DeleteTask);
    let second = backend.hold_next(MockOp::DeleteTask);
    bus.request_delete(older.clone()).unwrap();
    bus.request_delete(newer.clone()).unwrap();
    assert_view_keys(&bus.current_tasks(&all()), &["1"]);

    // The server deletes task 2, but the client keeps it until the next fetch.
    first.open();
    drain().await;
    assert_view_keys(&bus.current_tasks(&all()), &["1", "2"]);
    assert!(!bus.is_task_being_deleted(&older));
    assert!(bus.is_task_being_deleted(&newer));
    assert!(engine.state().read_tasks(|p| p.store.contains(&older)));
    assert!(backend.server_tasks().iter().all(|t| t.id != older));

    second.open();
    settled(&mut rx, Category::Delete).await;
    assert_view_keys(&bus.current_tasks(&all()), &["1", "2"]);
    assert!(engine.state().read_tasks(|p| !p.store.contains(&newer)));
    assert_eq!(failures(&mut all_events), 0);
    assert!(bus.error(ErrorSlot::Tasks).is_none());
    assert_ledger_empty(engine.state());
}

// ============================================================================
// FETCH & SUPERSESSION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn only_latest_fetch_is_applied() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    let gate = backend.hold_next(MockOp::FetchTasks);
    bus.request_fetch(EntityKind::Task, all().with_status(TaskStatus::Todo))
        .unwrap();
    bus.request_fetch(EntityKind::Task, all().with_status(TaskStatus::Done))
        .unwrap();
    settled(&mut rx, Category::FetchTasks).await;
    assert_view_keys(&bus.current_tasks(&all()), &["3"]);

    gate.open();
    drain().await;
    assert_view_keys(&bus.current_tasks(&all()), &["3"]);
    assert!(!bus.is_loading(EntityKind::Task));
    assert_eq!(backend.calls(MockOp::FetchTasks), 2);
}

#[tokio::test(start_paused = true)]
async fn loading_flag_tracks_latest_request() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    let gate = backend.hold_next(MockOp::FetchProjects);
    bus.request_fetch(EntityKind::Project, all()).unwrap();
    assert!(bus.current_view(EntityKind::Project, &all()).loading);
    assert!(!bus.is_loading(EntityKind::User));

    gate.open();
    settled(&mut rx, Category::FetchProjects).await;
    let view = bus.current_view(EntityKind::Project, &all());
    assert!(!view.loading);
    assert_eq!(view.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn users_filtered_by_project_membership() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    bus.request_fetch(EntityKind::User, all()).unwrap();
    settled(&mut rx, Category::FetchUsers).await;
    bus.request_fetch(EntityKind::Project, all()).unwrap();
    settled(&mut rx, Category::FetchProjects).await;

    let names: Vec<String> = bus
        .project_users(&ProjectId::new("p1"))
        .into_iter()
        .map(|u| u.name)
        .collect();
    assert_eq!(names, vec!["Ada", "Linus"]);
    assert!(bus.project_users(&ProjectId::new("p9")).is_empty());
}

// ============================================================================
// RETRY
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_three_times_with_linear_backoff() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    backend.fail_times(MockOp::FetchUsers, 3, BackendError::transient("503"));
    bus.request_fetch(EntityKind::User, all()).unwrap();

    let SyncEvent::Failed(failure) =
        wait_for(&mut rx, |e| matches!(e, SyncEvent::Failed(_))).await
    else {
        unreachable!()
    };
    assert_eq!(failure.category, Category::FetchUsers);
    assert_eq!(failure.key, CorrelationKey::None);
    assert_eq!(failure.attempts, 3);

    let times = backend.call_times(MockOp::FetchUsers);
    assert_eq!(times.len(), 3);
    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= Duration::from_millis(1000) && first_gap < Duration::from_millis(1100));
    assert!(second_gap >= Duration::from_millis(2000) && second_gap < Duration::from_millis(2100));

    assert!(bus.users().is_empty());
    assert_eq!(bus.error(ErrorSlot::Users).as_deref(), Some("503"));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_then_success_commits() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    backend.fail_times(MockOp::CreateTask, 2, BackendError::transient("timeout"));
    bus.request_create(draft("Eventually")).unwrap();
    settled(&mut rx, Category::Create).await;

    assert_eq!(backend.calls(MockOp::CreateTask), 3);
    assert_view_keys(&bus.current_tasks(&all()), &["srv-1"]);
    assert!(bus.error(ErrorSlot::Form).is_none());
    assert_ledger_empty(engine.state());
}

#[tokio::test(start_paused = true)]
async fn rejections_are_not_retried() {
    let backend = Arc::new(seeded_backend());
    let engine = engine_with(&backend);
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    backend.fail_next(MockOp::FetchProjects, BackendError::rejected("unauthorized"));
    bus.request_fetch(EntityKind::Project, all()).unwrap();
    settled(&mut rx, Category::FetchProjects).await;

    assert_eq!(backend.calls(MockOp::FetchProjects), 1);
    assert!(bus.projects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_refetch_keeps_last_known_good() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();
    let mut rx = bus.subscribe();

    backend.fail_times(MockOp::FetchTasks, 3, BackendError::transient("down"));
    bus.request_fetch(EntityKind::Task, all()).unwrap();
    settled(&mut rx, Category::FetchTasks).await;

    assert_view_keys(&bus.current_tasks(&all()), &["1", "2", "3"]);
    assert_eq!(bus.error(ErrorSlot::Tasks).as_deref(), Some("down"));
}

// ============================================================================
// FILTERS, STAGES, LIFECYCLE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn view_filters_compose_over_merged_state() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();

    let gate = backend.hold_next(MockOp::CreateTask);
    let mut new_task = draft("Fix login bug");
    new_task.project_id = Some(ProjectId::new("p1"));
    bus.request_create(new_task).unwrap();

    let filters = all().with_project("p1").with_search("LOGIN");
    let view = bus.current_tasks(&filters);
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].task_id(), Some(&TaskId::new("2")));
    assert!(view[1].temp_id().is_some());

    drop(gate);
    engine.shutdown().await;
    assert_ledger_empty(engine.state());
}

struct NoDeletes;

impl BusStage for NoDeletes {
    fn name(&self) -> &'static str {
        "no-deletes"
    }

    fn process(&self, command: Command) -> Option<Command> {
        match command {
            Command::Delete { .. } => None,
            other => Some(other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn stage_can_drop_commands() {
    let backend = Arc::new(MockBackend::new().with_tasks(sample_tasks()));
    let engine = SyncEngine::builder(backend.clone()).stage(NoDeletes).start();

    let outcome = engine.bus().request_delete(TaskId::new("1")).unwrap();
    assert!(outcome.is_none());
    assert!(!engine.bus().is_task_being_deleted(&TaskId::new("1")));
    assert_ledger_empty(engine.state());

    drain().await;
    assert_eq!(backend.calls(MockOp::DeleteTask), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_in_flight_and_rejects_new_commands() {
    let backend = Arc::new(seeded_backend());
    let engine = loaded(&backend).await;
    let bus = engine.bus();

    backend.fail_times(MockOp::UpdateTask, 2, BackendError::transient("flaky"));
    for i in 0..3 {
        bus.request_create(draft(&format!("Task {i}"))).unwrap();
    }
    bus.request_update(TaskId::new("1"), TaskPatch::new().title("Renamed"))
        .unwrap();
    bus.request_delete(TaskId::new("3")).unwrap();
    assert_eq!(engine.state().pending_count(), 5);

    engine.shutdown().await;

    assert_ledger_empty(engine.state());
    assert!(matches!(
        bus.request_create(draft("late")),
        Err(SyncError::EngineClosed)
    ));
    assert_ledger_empty(engine.state());
}
