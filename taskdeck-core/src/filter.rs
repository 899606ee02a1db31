//! Task filter criteria
//!
//! The same filter value drives two things: the query sent with a task fetch
//! and the client-side narrowing applied to the merged view.

use crate::entities::TaskFields;
use crate::enums::{TaskStatus, TaskType};
use crate::identity::{ProjectId, UserId};
use serde::{Deserialize, Serialize};

/// Either "match everything" or "match exactly this value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection<T> {
    All,
    Only(T),
}

impl<T: PartialEq> Selection<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(expected) => expected == value,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Selection::All
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskFilters {
    pub project_id: Option<ProjectId>,
    pub assignee_id: Option<UserId>,
    pub status: Selection<TaskStatus>,
    pub task_type: Selection<TaskType>,
    pub search: String,
}

impl TaskFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_assignee(mut self, assignee_id: impl Into<UserId>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Selection::Only(status);
        self
    }

    pub fn with_task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Selection::Only(task_type);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    /// Filters with every criterion reset.
    pub fn cleared() -> Self {
        Self::default()
    }

    pub fn is_unfiltered(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay the criteria present in `patch`, keeping the rest.
    pub fn merge(&mut self, patch: FiltersPatch) {
        if let Some(project_id) = patch.project_id {
            self.project_id = project_id;
        }
        if let Some(assignee_id) = patch.assignee_id {
            self.assignee_id = assignee_id;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(task_type) = patch.task_type {
            self.task_type = task_type;
        }
        if let Some(search) = patch.search {
            self.search = search;
        }
    }

    /// True when `fields` passes every criterion. Criteria are checked in
    /// the fixed order project, assignee, status, type, search.
    pub fn matches(&self, fields: &TaskFields) -> bool {
        if let Some(project_id) = &self.project_id {
            if fields.project_id.as_ref() != Some(project_id) {
                return false;
            }
        }
        if let Some(assignee_id) = &self.assignee_id {
            if fields.assignee_id.as_ref() != Some(assignee_id) {
                return false;
            }
        }
        if !self.status.admits(&fields.status) {
            return false;
        }
        if !self.task_type.admits(&fields.task_type) {
            return false;
        }
        if !self.search.is_empty() && !fields.mentions(&self.search.to_lowercase()) {
            return false;
        }
        true
    }

    /// Keep the items whose fields match, preserving their order.
    pub fn apply<T, F>(&self, items: Vec<T>, fields: F) -> Vec<T>
    where
        F: Fn(&T) -> &TaskFields,
    {
        if self.is_unfiltered() {
            return items;
        }
        items.into_iter().filter(|item| self.matches(fields(item))).collect()
    }

    /// Query-string form used when asking the backend for a filtered list.
    /// Criteria set to "all" are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(project_id) = &self.project_id {
            pairs.push(("projectId", project_id.to_string()));
        }
        if let Some(assignee_id) = &self.assignee_id {
            pairs.push(("assigneeId", assignee_id.to_string()));
        }
        if let Selection::Only(status) = self.status {
            pairs.push(("status", status.to_string()));
        }
        if let Selection::Only(task_type) = self.task_type {
            pairs.push(("taskType", task_type.to_string()));
        }
        if !self.search.is_empty() {
            pairs.push(("search", self.search.clone()));
        }
        pairs
    }
}

/// Partial filter update. `None` leaves a criterion as it is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FiltersPatch {
    pub project_id: Option<Option<ProjectId>>,
    pub assignee_id: Option<Option<UserId>>,
    pub status: Option<Selection<TaskStatus>>,
    pub task_type: Option<Selection<TaskType>>,
    pub search: Option<String>,
}

impl FiltersPatch {
    pub fn search(search: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            ..Self::default()
        }
    }
}
