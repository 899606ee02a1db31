//! Entity structs: tasks, users, projects and task patches.

use crate::enums::{EntityKind, Priority, Severity, TaskStatus, TaskType};
use crate::identity::{ProjectId, TaskId, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// A normalized entity that can live in an entity store.
///
/// Implementations must return a stable id for the lifetime of the value and
/// the same `KIND` for every instance.
pub trait Entity: Clone + Debug + Send + Sync + 'static {
    type Id: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    const KIND: EntityKind;

    fn id(&self) -> &Self::Id;
}

// ============================================================================
// TASKS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

impl Subtask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            completed: false,
        }
    }
}

/// Type-specific task payload.
///
/// Each field is only meaningful for one task type (severity and steps for
/// bugs, business value and acceptance criteria for features, behaviors for
/// enhancements, questions and outcomes for research). Nothing here enforces
/// that pairing; callers building drafts are responsible for it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_to_reproduce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_behavior: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcomes: Option<String>,
}

/// Every task attribute except the identity. Used as the create payload and
/// as the body of both confirmed and speculative tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFields {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(flatten)]
    pub details: TypeDetails,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
}

impl TaskFields {
    pub fn new(title: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            title: title.into(),
            description: None,
            task_type,
            priority: Priority::default(),
            status: TaskStatus::default(),
            project_id: None,
            assignee_id: None,
            due_date: None,
            details: TypeDetails::default(),
            subtasks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_assignee(mut self, assignee_id: impl Into<UserId>) -> Self {
        self.assignee_id = Some(assignee_id.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn with_details(mut self, details: TypeDetails) -> Self {
        self.details = details;
        self
    }

    pub fn with_subtask(mut self, subtask: Subtask) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// Case-insensitive substring match against title and description.
    /// `needle_lower` must already be lowercased.
    pub fn mentions(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(needle_lower))
    }
}

/// A task confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(flatten)]
    pub fields: TaskFields,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, fields: TaskFields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

impl Entity for Task {
    type Id = TaskId;

    const KIND: EntityKind = EntityKind::Task;

    fn id(&self) -> &TaskId {
        &self.id
    }
}

// ============================================================================
// USERS & PROJECTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
        }
    }
}

impl Entity for User {
    type Id = UserId;

    const KIND: EntityKind = EntityKind::User;

    fn id(&self) -> &UserId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Members that tasks in this project may be assigned to.
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

impl Project {
    pub fn new(id: impl Into<ProjectId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            user_ids: Vec::new(),
        }
    }

    pub fn with_member(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_ids.push(user_id.into());
        self
    }

    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.user_ids.contains(user_id)
    }
}

impl Entity for Project {
    type Id = ProjectId;

    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> &ProjectId {
        &self.id
    }
}

// ============================================================================
// PATCHES
// ============================================================================

/// `null` on the wire means "clear", an absent key means "leave as is".
mod clearable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

/// Partial task update. Absent fields are left untouched; for optional task
/// attributes `Some(None)` clears the value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "clearable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<TaskType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(
        default,
        deserialize_with = "clearable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_id: Option<Option<ProjectId>>,
    #[serde(
        default,
        deserialize_with = "clearable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee_id: Option<Option<UserId>>,
    #[serde(
        default,
        deserialize_with = "clearable::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<TypeDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtasks: Option<Vec<Subtask>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn task_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn project(mut self, project_id: Option<ProjectId>) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn assignee(mut self, assignee_id: Option<UserId>) -> Self {
        self.assignee_id = Some(assignee_id);
        self
    }

    pub fn due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn details(mut self, details: TypeDetails) -> Self {
        self.details = Some(details);
        self
    }

    pub fn subtasks(mut self, subtasks: Vec<Subtask>) -> Self {
        self.subtasks = Some(subtasks);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }

    /// Shallow merge: every present field overwrites the target.
    pub fn apply_to(&self, fields: &mut TaskFields) {
        if let Some(title) = &self.title {
            fields.title = title.clone();
        }
        if let Some(description) = &self.description {
            fields.description = description.clone();
        }
        if let Some(task_type) = self.task_type {
            fields.task_type = task_type;
        }
        if let Some(priority) = self.priority {
            fields.priority = priority;
        }
        if let Some(status) = self.status {
            fields.status = status;
        }
        if let Some(project_id) = &self.project_id {
            fields.project_id = project_id.clone();
        }
        if let Some(assignee_id) = &self.assignee_id {
            fields.assignee_id = assignee_id.clone();
        }
        if let Some(due_date) = self.due_date {
            fields.due_date = due_date;
        }
        if let Some(details) = &self.details {
            fields.details = details.clone();
        }
        if let Some(subtasks) = &self.subtasks {
            fields.subtasks = subtasks.clone();
        }
    }

    /// Copy of `task` with this patch applied.
    pub fn applied(&self, task: &Task) -> Task {
        let mut patched = task.clone();
        self.apply_to(&mut patched.fields);
        patched
    }
}
