//! Mutation orchestration.
//!
//! Every accepted command becomes a [`Job`] owned by the worker of its
//! category. A job moves through
//!
//! ```text
//! Submitted -> Optimistic -> Attempting(n) -> Committed | Exhausted
//!                                          \-> Superseded
//! ```
//!
//! The optimistic ledger entry is written synchronously in [`submit`], before
//! the job reaches a worker. The worker runs attempts concurrently in a
//! `JoinSet` and is the only writer applying settlements for its category.
//! Each submission bumps the category generation; a job that finishes under
//! an older generation is superseded: it writes nothing to the store, emits no
//! failure, and only retires the ledger entry it still owns.
//!
//! [`submit`]: MutationOrchestrator::submit

use crate::bus::Command;
use crate::error::{SyncError, SyncResult};
use crate::events::{CorrelationKey, EventHub, Failure, RejectedPayload, SyncEvent};
use crate::retry::RetryPolicy;
use crate::status::{Category, SyncStatus};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use taskdeck_core::{
    BackendError, BackendResult, Deleted, EntityKind, Project, RequestId, Task, TaskBackend,
    TaskFields, TaskFilters, TaskId, TaskPatch, TempId, User,
};
use taskdeck_store::SyncState;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

// ============================================================================
// JOBS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Optimistic,
    Attempting(u32),
    Committed,
    Exhausted,
    Superseded,
}

#[derive(Debug, Clone)]
pub enum JobPayload {
    FetchTasks(TaskFilters),
    FetchUsers,
    FetchProjects,
    Create { temp_id: TempId, draft: TaskFields },
    Update { id: TaskId, patch: TaskPatch },
    Delete { id: TaskId },
}

impl JobPayload {
    pub fn category(&self) -> Category {
        match self {
            JobPayload::FetchTasks(_) => Category::FetchTasks,
            JobPayload::FetchUsers => Category::FetchUsers,
            JobPayload::FetchProjects => Category::FetchProjects,
            JobPayload::Create { .. } => Category::Create,
            JobPayload::Update { .. } => Category::Update,
            JobPayload::Delete { .. } => Category::Delete,
        }
    }

    pub fn correlation_key(&self) -> CorrelationKey {
        match self {
            JobPayload::Create { temp_id, .. } => CorrelationKey::Temp(*temp_id),
            JobPayload::Update { id, .. } | JobPayload::Delete { id } => {
                CorrelationKey::Entity(id.clone())
            }
            JobPayload::FetchTasks(_) | JobPayload::FetchUsers | JobPayload::FetchProjects => {
                CorrelationKey::None
            }
        }
    }
}

/// One submitted request, owned by the worker processing it.
#[derive(Debug, Clone)]
pub struct Job {
    pub request_id: RequestId,
    pub generation: u64,
    pub payload: JobPayload,
    state: JobState,
}

impl Job {
    fn new(request_id: RequestId, generation: u64, payload: JobPayload) -> Self {
        Self {
            request_id,
            generation,
            payload,
            state: JobState::Submitted,
        }
    }

    pub fn category(&self) -> Category {
        self.payload.category()
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn transition(&mut self, next: JobState) {
        debug!(
            request_id = %self.request_id,
            category = %self.category(),
            from = ?self.state,
            to = ?next,
            "Job state change"
        );
        self.state = next;
    }
}

/// Handle returned for an accepted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    pub request_id: RequestId,
    pub category: Category,
    /// Set for creates only.
    pub temp_id: Option<TempId>,
}

enum Outcome {
    Tasks(Vec<Task>),
    Users(Vec<User>),
    Projects(Vec<Project>),
    Saved(Task),
    Deleted(Deleted),
}

struct Settlement {
    job: Job,
    attempts: u32,
    result: BackendResult<Outcome>,
}

// ============================================================================
// SHARED WORKER STATE
// ============================================================================

struct Shared {
    state: Arc<SyncState>,
    backend: Arc<dyn TaskBackend>,
    policy: RetryPolicy,
    status: Arc<SyncStatus>,
    events: EventHub,
    generations: [AtomicU64; 6],
    next_request: AtomicU64,
    /// Serializes "bump generation + raise loading" against settlement
    /// ("check generation + write store + lower loading").
    lanes: Mutex<()>,
}

impl Shared {
    fn new(
        state: Arc<SyncState>,
        backend: Arc<dyn TaskBackend>,
        policy: RetryPolicy,
        status: Arc<SyncStatus>,
        events: EventHub,
    ) -> Self {
        Self {
            state,
            backend,
            policy,
            status,
            events,
            generations: Default::default(),
            next_request: AtomicU64::new(1),
            lanes: Mutex::new(()),
        }
    }

    fn generation(&self, category: Category) -> u64 {
        self.generations[category.index()].load(Ordering::SeqCst)
    }

    fn is_current(&self, job: &Job) -> bool {
        self.generation(job.category()) == job.generation
    }

    /// Claim the newest generation of `category` and mark it loading.
    fn open_lane(&self, category: Category) -> u64 {
        let changed;
        let generation;
        {
            let _lane = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            generation = self.generations[category.index()].fetch_add(1, Ordering::SeqCst) + 1;
            changed = self.status.set_loading(category, true);
        }
        if changed {
            self.events.publish(SyncEvent::LoadingChanged {
                category,
                loading: true,
            });
        }
        generation
    }

    /// Lower the loading flag if `job` is still the newest of its category.
    fn close_lane(&self, job: &Job) {
        let category = job.category();
        let changed = {
            let _lane = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            self.is_current(job) && self.status.set_loading(category, false)
        };
        if changed {
            self.events.publish(SyncEvent::LoadingChanged {
                category,
                loading: false,
            });
        }
    }

    // === Attempts ===

    async fn drive(&self, mut job: Job) -> Settlement {
        let mut attempt = 0;
        loop {
            job.transition(JobState::Attempting(attempt));
            match self.call(&job.payload).await {
                Ok(outcome) => {
                    return Settlement {
                        job,
                        attempts: attempt + 1,
                        result: Ok(outcome),
                    }
                }
                Err(err)
                    if err.is_transient()
                        && self.policy.should_retry(attempt)
                        && self.is_current(&job) =>
                {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        request_id = %job.request_id,
                        category = %job.category(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Settlement {
                        job,
                        attempts: attempt + 1,
                        result: Err(err),
                    }
                }
            }
        }
    }

    async fn call(&self, payload: &JobPayload) -> BackendResult<Outcome> {
        let backend = self.backend.as_ref();
        Ok(match payload {
            JobPayload::FetchTasks(filters) => Outcome::Tasks(backend.fetch_tasks(filters).await?),
            JobPayload::FetchUsers => Outcome::Users(backend.fetch_users().await?),
            JobPayload::FetchProjects => Outcome::Projects(backend.fetch_projects().await?),
            JobPayload::Create { draft, .. } => Outcome::Saved(backend.create_task(draft).await?),
            JobPayload::Update { id, patch } => {
                Outcome::Saved(backend.update_task(id, patch).await?)
            }
            JobPayload::Delete { id } => Outcome::Deleted(backend.delete_task(id).await?),
        })
    }

    // === Settlement ===

    /// Apply or discard a finished job. The generation check, the store write
    /// and the loading flag all happen under `lanes`, so a submit that claims
    /// a newer generation is ordered entirely before or after them. Events go
    /// out once the lane is released.
    fn settle(&self, settlement: Settlement) {
        let Settlement {
            mut job,
            attempts,
            result,
        } = settlement;
        let category = job.category();

        let mut outbox = Vec::new();
        {
            let _lane = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(&job) {
                job.transition(JobState::Superseded);
                debug!(
                    request_id = %job.request_id,
                    category = %category,
                    generation = job.generation,
                    latest = self.generation(category),
                    "Discarding superseded result"
                );
                outbox.extend(self.rollback(&job));
            } else {
                match result {
                    Ok(outcome) => {
                        outbox.extend(self.commit(&job, outcome));
                        job.transition(JobState::Committed);
                        info!(
                            request_id = %job.request_id,
                            category = %category,
                            attempts,
                            "Request committed"
                        );
                    }
                    Err(err) => {
                        outbox.extend(self.exhaust(&job, attempts, &err));
                        job.transition(JobState::Exhausted);
                    }
                }
                if self.status.set_loading(category, false) {
                    outbox.push(SyncEvent::LoadingChanged {
                        category,
                        loading: false,
                    });
                }
            }
        }

        for event in outbox {
            self.events.publish(event);
        }
    }

    /// Apply a confirmed result to the store and retire the ledger entry,
    /// both inside one critical section.
    fn commit(&self, job: &Job, outcome: Outcome) -> Option<SyncEvent> {
        let owner = job.request_id;
        let kind = match (&job.payload, outcome) {
            (JobPayload::FetchTasks(_), Outcome::Tasks(tasks)) => {
                self.state.write_tasks(|p| p.store.replace_all(tasks));
                EntityKind::Task
            }
            (JobPayload::FetchUsers, Outcome::Users(users)) => {
                self.state.write_users(|store| store.replace_all(users));
                EntityKind::User
            }
            (JobPayload::FetchProjects, Outcome::Projects(projects)) => {
                self.state.write_projects(|store| store.replace_all(projects));
                EntityKind::Project
            }
            (JobPayload::Create { temp_id, .. }, Outcome::Saved(task)) => {
                self.state.write_tasks(|p| {
                    p.store.upsert(task);
                    p.ledger.settle_create(*temp_id);
                });
                EntityKind::Task
            }
            (JobPayload::Update { id, .. }, Outcome::Saved(task)) => {
                self.state.write_tasks(|p| {
                    p.store.upsert(task);
                    p.ledger.release_update(id, owner);
                });
                EntityKind::Task
            }
            (JobPayload::Delete { id }, Outcome::Deleted(_)) => {
                self.state.write_tasks(|p| {
                    p.store.remove(id);
                    p.ledger.release_delete(id, owner);
                });
                EntityKind::Task
            }
            _ => {
                error!(
                    request_id = %job.request_id,
                    category = %job.category(),
                    "Backend outcome does not match request; rolling back"
                );
                return self.rollback(job);
            }
        };
        Some(SyncEvent::ViewChanged { kind })
    }

    fn exhaust(&self, job: &Job, attempts: u32, err: &BackendError) -> Vec<SyncEvent> {
        let category = job.category();
        let mut events: Vec<SyncEvent> = self.rollback(job).into_iter().collect();

        let mut failure = Failure::new(category, job.payload.correlation_key(), err.message())
            .with_attempts(attempts);
        match &job.payload {
            JobPayload::Create { draft, .. } => {
                failure = failure.with_payload(RejectedPayload::Draft(draft.clone()));
            }
            JobPayload::Update { patch, .. } => {
                failure = failure.with_payload(RejectedPayload::Patch(patch.clone()));
            }
            _ => {}
        }

        warn!(
            request_id = %job.request_id,
            category = %category,
            attempts,
            transient = err.is_transient(),
            error = %err,
            "Request failed"
        );
        self.status.record_error(category.error_slot(), err.message());
        events.push(SyncEvent::Failed(failure));
        events
    }

    /// Retire the ledger entry this job still owns. Fetches own none.
    fn rollback(&self, job: &Job) -> Option<SyncEvent> {
        let owner = job.request_id;
        let released = match &job.payload {
            JobPayload::Create { temp_id, .. } => self
                .state
                .write_tasks(|p| p.ledger.settle_create(*temp_id).is_some()),
            JobPayload::Update { id, .. } => {
                self.state.write_tasks(|p| p.ledger.release_update(id, owner))
            }
            JobPayload::Delete { id } => {
                self.state.write_tasks(|p| p.ledger.release_delete(id, owner))
            }
            JobPayload::FetchTasks(_) | JobPayload::FetchUsers | JobPayload::FetchProjects => false,
        };
        released.then_some(SyncEvent::ViewChanged {
            kind: EntityKind::Task,
        })
    }

    /// Undo a job that never reached a worker.
    fn abandon(&self, job: &Job) {
        if let Some(event) = self.rollback(job) {
            self.events.publish(event);
        }
        self.close_lane(job);
    }

    fn handle_joined(
        &self,
        category: Category,
        joined: Result<(task::Id, Settlement), JoinError>,
        jobs: &mut HashMap<task::Id, Job>,
    ) {
        match joined {
            Ok((id, settlement)) => {
                jobs.remove(&id);
                self.settle(settlement);
            }
            Err(err) => {
                error!(category = %category, error = %err, "Attempt task did not complete");
                match jobs.remove(&err.id()) {
                    Some(job) => self.settle(Settlement {
                        job,
                        attempts: 1,
                        result: Err(BackendError::rejected("request was cancelled")),
                    }),
                    None => warn!(category = %category, "No job recorded for attempt task"),
                }
            }
        }
    }
}

async fn run_worker(shared: Arc<Shared>, category: Category, mut rx: mpsc::UnboundedReceiver<Job>) {
    let mut in_flight: JoinSet<Settlement> = JoinSet::new();
    let mut jobs: HashMap<task::Id, Job> = HashMap::new();
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(job) => {
                    let shared = Arc::clone(&shared);
                    let tracked = job.clone();
                    let handle = in_flight.spawn(async move {
                        let fallback = job.clone();
                        match AssertUnwindSafe(shared.drive(job)).catch_unwind().await {
                            Ok(settlement) => settlement,
                            Err(_) => Settlement {
                                job: fallback,
                                attempts: 1,
                                result: Err(BackendError::rejected("backend call panicked")),
                            },
                        }
                    });
                    jobs.insert(handle.id(), tracked);
                }
                None => break,
            },
            Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                shared.handle_joined(category, joined, &mut jobs);
            }
        }
    }

    debug!(category = %category, remaining = in_flight.len(), "Draining in-flight jobs");
    while let Some(joined) = in_flight.join_next_with_id().await {
        shared.handle_joined(category, joined, &mut jobs);
    }
    debug!(category = %category, "Worker stopped");
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct MutationOrchestrator {
    shared: Arc<Shared>,
    senders: Mutex<Option<Vec<mpsc::UnboundedSender<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MutationOrchestrator {
    /// Start one worker per category. Must be called inside a tokio runtime.
    pub fn spawn(
        state: Arc<SyncState>,
        backend: Arc<dyn TaskBackend>,
        policy: RetryPolicy,
        status: Arc<SyncStatus>,
        events: EventHub,
    ) -> Self {
        let shared = Arc::new(Shared::new(state, backend, policy, status, events));

        let mut senders = Vec::with_capacity(Category::all().len());
        let mut workers = Vec::with_capacity(Category::all().len());
        for &category in Category::all() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(Arc::clone(&shared), category, rx)));
        }

        Self {
            shared,
            senders: Mutex::new(Some(senders)),
            workers: Mutex::new(workers),
        }
    }

    /// Accept a command: write its optimistic ledger entry, then hand it to
    /// the worker of its category.
    pub fn submit(&self, command: Command) -> SyncResult<Ticket> {
        let sender = self.sender(command.category())?;
        let request_id = RequestId::new(self.shared.next_request.fetch_add(1, Ordering::SeqCst));

        let payload = match command {
            Command::Fetch { kind, filters } => match kind {
                EntityKind::Task => JobPayload::FetchTasks(filters),
                EntityKind::User => JobPayload::FetchUsers,
                EntityKind::Project => JobPayload::FetchProjects,
            },
            Command::Create { draft } => {
                let temp_id = self
                    .shared
                    .state
                    .write_tasks(|p| p.ledger.begin_create(draft.clone(), request_id));
                JobPayload::Create { temp_id, draft }
            }
            Command::Update { id, patch } => {
                self.shared.state.write_tasks(|p| {
                    p.ledger.begin_update(id.clone(), patch.clone(), request_id)
                });
                JobPayload::Update { id, patch }
            }
            Command::Delete { id } => {
                self.shared
                    .state
                    .write_tasks(|p| p.ledger.begin_delete(id.clone(), request_id));
                JobPayload::Delete { id }
            }
        };

        let category = payload.category();
        let generation = self.shared.open_lane(category);
        let mut job = Job::new(request_id, generation, payload);
        if category.is_mutation() {
            job.transition(JobState::Optimistic);
            self.shared.events.publish(SyncEvent::ViewChanged {
                kind: EntityKind::Task,
            });
        }

        let ticket = Ticket {
            request_id,
            category,
            temp_id: match &job.payload {
                JobPayload::Create { temp_id, .. } => Some(*temp_id),
                _ => None,
            },
        };
        debug!(request_id = %request_id, category = %category, generation, "Dispatching job");

        if let Err(mpsc::error::SendError(job)) = sender.send(job) {
            self.shared.abandon(&job);
            return Err(SyncError::EngineClosed);
        }
        Ok(ticket)
    }

    pub fn current_generation(&self, category: Category) -> u64 {
        self.shared.generation(category)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    /// Close every command channel and wait for the workers to drain.
    pub async fn shutdown(&self) {
        let senders = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(senders);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in workers {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker ended abnormally");
            }
        }
    }

    fn sender(&self, category: Category) -> SyncResult<mpsc::UnboundedSender<Job>> {
        let senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders
            .as_ref()
            .and_then(|senders| senders.get(category.index()).cloned())
            .ok_or(SyncError::EngineClosed)
    }
}

impl std::fmt::Debug for MutationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOrchestrator")
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}
