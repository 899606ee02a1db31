//! Async contract for the remote task service.
//!
//! The sync engine only ever talks to the backend through this trait. Each
//! call is one attempt; retrying is the caller's business.

use crate::entities::{Project, Task, TaskFields, TaskPatch, User};
use crate::error::BackendResult;
use crate::filter::TaskFilters;
use crate::identity::TaskId;
use ::async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledgement of a successful delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted {
    pub id: TaskId,
}

#[async_trait]
pub trait TaskBackend: Send + Sync {
    // ========================================================================
    // READS
    // ========================================================================

    /// List tasks matching `filters`.
    async fn fetch_tasks(&self, filters: &TaskFilters) -> BackendResult<Vec<Task>>;

    async fn fetch_users(&self) -> BackendResult<Vec<User>>;

    async fn fetch_projects(&self) -> BackendResult<Vec<Project>>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Create a task. The returned task carries the server-assigned id.
    async fn create_task(&self, draft: &TaskFields) -> BackendResult<Task>;

    /// Apply `patch` and return the task as the server now stores it.
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> BackendResult<Task>;

    async fn delete_task(&self, id: &TaskId) -> BackendResult<Deleted>;
}
