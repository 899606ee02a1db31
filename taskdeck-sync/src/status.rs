//! Operation categories, loading flags and error slots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use taskdeck_core::EntityKind;

/// Independent lane of requests. Supersession and loading are tracked per
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    FetchTasks,
    FetchUsers,
    FetchProjects,
    Create,
    Update,
    Delete,
}

impl Category {
    pub fn all() -> &'static [Category] {
        &[
            Category::FetchTasks,
            Category::FetchUsers,
            Category::FetchProjects,
            Category::Create,
            Category::Update,
            Category::Delete,
        ]
    }

    pub fn kind(self) -> EntityKind {
        match self {
            Category::FetchUsers => EntityKind::User,
            Category::FetchProjects => EntityKind::Project,
            Category::FetchTasks | Category::Create | Category::Update | Category::Delete => {
                EntityKind::Task
            }
        }
    }

    /// Slot that records a terminal failure in this category.
    pub fn error_slot(self) -> ErrorSlot {
        match self {
            Category::FetchTasks | Category::Delete => ErrorSlot::Tasks,
            Category::FetchUsers => ErrorSlot::Users,
            Category::FetchProjects => ErrorSlot::Projects,
            Category::Create | Category::Update => ErrorSlot::Form,
        }
    }

    pub fn is_mutation(self) -> bool {
        matches!(self, Category::Create | Category::Update | Category::Delete)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Category::FetchTasks => 0,
            Category::FetchUsers => 1,
            Category::FetchProjects => 2,
            Category::Create => 3,
            Category::Update => 4,
            Category::Delete => 5,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::FetchTasks => "fetch_tasks",
            Category::FetchUsers => "fetch_users",
            Category::FetchProjects => "fetch_projects",
            Category::Create => "create",
            Category::Update => "update",
            Category::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSlot {
    Tasks,
    Users,
    Projects,
    Form,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub loading: Vec<Category>,
    pub errors: HashMap<ErrorSlot, String>,
}

#[derive(Debug, Default)]
struct StatusInner {
    loading: [bool; 6],
    errors: HashMap<ErrorSlot, String>,
}

/// Loading flags and last error per slot.
#[derive(Debug, Default)]
pub struct SyncStatus {
    inner: Mutex<StatusInner>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the loading flag. Returns true when the flag changed.
    pub fn set_loading(&self, category: Category, loading: bool) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut inner.loading[category.index()];
        let changed = *slot != loading;
        *slot = loading;
        changed
    }

    pub fn is_loading(&self, category: Category) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.loading[category.index()]
    }

    /// True while any category touching `kind` is loading.
    pub fn is_kind_loading(&self, kind: EntityKind) -> bool {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Category::all()
            .iter()
            .any(|c| c.kind() == kind && inner.loading[c.index()])
    }

    pub fn record_error(&self, slot: ErrorSlot, message: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.errors.insert(slot, message.into());
    }

    pub fn clear_error(&self, slot: ErrorSlot) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.errors.remove(&slot)
    }

    pub fn error(&self, slot: ErrorSlot) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.errors.get(&slot).cloned()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        StatusSnapshot {
            loading: Category::all()
                .iter()
                .copied()
                .filter(|c| inner.loading[c.index()])
                .collect(),
            errors: inner.errors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_all_order() {
        for (i, category) in Category::all().iter().enumerate() {
            assert_eq!(category.index(), i);
        }
    }

    #[test]
    fn loading_reports_changes_only() {
        let status = SyncStatus::new();
        assert!(status.set_loading(Category::Create, true));
        assert!(!status.set_loading(Category::Create, true));
        assert!(status.is_kind_loading(EntityKind::Task));
        assert!(!status.is_kind_loading(EntityKind::User));
        assert!(status.set_loading(Category::Create, false));
        assert!(!status.is_kind_loading(EntityKind::Task));
    }

    #[test]
    fn failures_route_to_slots() {
        assert_eq!(Category::Delete.error_slot(), ErrorSlot::Tasks);
        assert_eq!(Category::Update.error_slot(), ErrorSlot::Form);
        assert_eq!(Category::FetchProjects.error_slot(), ErrorSlot::Projects);
    }

    #[test]
    fn clear_error_empties_slot() {
        let status = SyncStatus::new();
        status.record_error(ErrorSlot::Form, "title required");
        assert_eq!(status.error(ErrorSlot::Form).as_deref(), Some("title required"));
        assert_eq!(status.snapshot().errors.len(), 1);
        assert_eq!(status.clear_error(ErrorSlot::Form).as_deref(), Some("title required"));
        assert!(status.error(ErrorSlot::Form).is_none());
    }
}
