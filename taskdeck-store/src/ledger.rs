//! Optimistic ledger: bookkeeping for task mutations that are in flight.
//!
//! Entries are transient. One is written when a mutation is submitted and
//! removed when that mutation settles, whatever the outcome. The ledger never
//! decides outcomes itself; the orchestrator calls `settle_*`.

use std::collections::HashMap;
use taskdeck_core::{RequestId, TaskFields, TaskId, TaskPatch, TempId};

/// A task that exists only on the client until its create call settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeculativeTask {
    pub temp_id: TempId,
    pub fields: TaskFields,
    pub owner: RequestId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPatch {
    pub patch: TaskPatch,
    pub owner: RequestId,
}

#[derive(Debug, Clone, Default)]
pub struct OptimisticLedger {
    pending_creates: Vec<SpeculativeTask>,
    pending_updates: HashMap<TaskId, PendingPatch>,
    pending_deletes: HashMap<TaskId, RequestId>,
    revision: u64,
}

impl OptimisticLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // === Creates ===

    /// Record a speculative task and return the temp id that correlates it
    /// with its eventual settlement.
    pub fn begin_create(&mut self, fields: TaskFields, owner: RequestId) -> TempId {
        let temp_id = TempId::generate();
        self.pending_creates.push(SpeculativeTask {
            temp_id,
            fields,
            owner,
        });
        self.revision += 1;
        temp_id
    }

    /// Drop the speculative entry for `temp_id`, on success or failure alike.
    pub fn settle_create(&mut self, temp_id: TempId) -> Option<SpeculativeTask> {
        let index = self
            .pending_creates
            .iter()
            .position(|entry| entry.temp_id == temp_id)?;
        self.revision += 1;
        Some(self.pending_creates.remove(index))
    }

    // === Updates ===

    /// Record the pending patch for `id`, overwriting any earlier one.
    pub fn begin_update(&mut self, id: TaskId, patch: TaskPatch, owner: RequestId) {
        self.pending_updates.insert(id, PendingPatch { patch, owner });
        self.revision += 1;
    }

    pub fn settle_update(&mut self, id: &TaskId) -> Option<PendingPatch> {
        let removed = self.pending_updates.remove(id)?;
        self.revision += 1;
        Some(removed)
    }

    /// Settle the patch for `id` only if `owner` still holds it.
    pub fn release_update(&mut self, id: &TaskId, owner: RequestId) -> bool {
        match self.pending_updates.get(id) {
            Some(entry) if entry.owner == owner => self.settle_update(id).is_some(),
            _ => false,
        }
    }

    // === Deletes ===

    pub fn begin_delete(&mut self, id: TaskId, owner: RequestId) {
        self.pending_deletes.insert(id, owner);
        self.revision += 1;
    }

    /// Un-hide `id`. Called after a successful delete has removed the entity
    /// from the store, and after a failed one to restore it.
    pub fn settle_delete(&mut self, id: &TaskId) -> bool {
        if self.pending_deletes.remove(id).is_none() {
            return false;
        }
        self.revision += 1;
        true
    }

    /// Settle the delete marker for `id` only if `owner` still holds it.
    pub fn release_delete(&mut self, id: &TaskId, owner: RequestId) -> bool {
        match self.pending_deletes.get(id) {
            Some(existing) if *existing == owner => self.settle_delete(id),
            _ => false,
        }
    }

    // === Queries ===

    pub fn pending_creates(&self) -> &[SpeculativeTask] {
        &self.pending_creates
    }

    pub fn pending_update(&self, id: &TaskId) -> Option<&TaskPatch> {
        self.pending_updates.get(id).map(|entry| &entry.patch)
    }

    pub fn is_pending_create(&self, temp_id: TempId) -> bool {
        self.pending_creates
            .iter()
            .any(|entry| entry.temp_id == temp_id)
    }

    pub fn is_pending_delete(&self, id: &TaskId) -> bool {
        self.pending_deletes.contains_key(id)
    }

    /// Total number of outstanding entries across all three kinds.
    pub fn len(&self) -> usize {
        self.pending_creates.len() + self.pending_updates.len() + self.pending_deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskdeck_core::{TaskStatus, TaskType};

    fn req(n: u64) -> RequestId {
        RequestId::new(n)
    }

    #[test]
    fn create_lifecycle() {
        let mut ledger = OptimisticLedger::new();
        let a = ledger.begin_create(TaskFields::new("A", TaskType::Bug), req(1));
        let b = ledger.begin_create(TaskFields::new("B", TaskType::Bug), req(2));

        assert_ne!(a, b);
        assert_eq!(ledger.pending_creates().len(), 2);
        assert!(ledger.is_pending_create(a));

        let settled = ledger.settle_create(a).unwrap();
        assert_eq!(settled.fields.title, "A");
        assert!(!ledger.is_pending_create(a));
        assert_eq!(ledger.pending_creates()[0].temp_id, b);
        assert!(ledger.settle_create(a).is_none());
    }

    #[test]
    fn temp_ids_never_repeat_after_cleanup() {
        let mut ledger = OptimisticLedger::new();
        let first = ledger.begin_create(TaskFields::new("A", TaskType::Bug), req(1));
        ledger.settle_create(first);
        let second = ledger.begin_create(TaskFields::new("A", TaskType::Bug), req(2));
        assert_ne!(first, second);
    }

    #[test]
    fn second_update_overwrites_first() {
        let mut ledger = OptimisticLedger::new();
        let id = TaskId::new("1");
        ledger.begin_update(id.clone(), TaskPatch::new().status(TaskStatus::Review), req(1));
        ledger.begin_update(id.clone(), TaskPatch::new().status(TaskStatus::Done), req(2));

        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.pending_update(&id).unwrap().status, Some(TaskStatus::Done));
    }

    #[test]
    fn release_only_touches_owned_entries() {
        let mut ledger = OptimisticLedger::new();
        let id = TaskId::new("1");
        ledger.begin_update(id.clone(), TaskPatch::new().title("x"), req(1));
        ledger.begin_update(id.clone(), TaskPatch::new().title("y"), req(2));

        assert!(!ledger.release_update(&id, req(1)));
        assert!(ledger.pending_update(&id).is_some());
        assert!(ledger.release_update(&id, req(2)));
        assert!(ledger.is_empty());

        ledger.begin_delete(id.clone(), req(3));
        ledger.begin_delete(id.clone(), req(4));
        assert!(!ledger.release_delete(&id, req(3)));
        assert!(ledger.is_pending_delete(&id));
        assert!(ledger.release_delete(&id, req(4)));
        assert!(!ledger.is_pending_delete(&id));
    }

    #[test]
    fn delete_settles_on_both_outcomes() {
        let mut ledger = OptimisticLedger::new();
        let id = TaskId::new("9");
        ledger.begin_delete(id.clone(), req(1));
        assert!(ledger.is_pending_delete(&id));
        assert!(ledger.settle_delete(&id));
        assert!(!ledger.settle_delete(&id));
        assert!(ledger.is_empty());
    }

    #[test]
    fn revision_moves_only_on_change() {
        let mut ledger = OptimisticLedger::new();
        let r0 = ledger.revision();
        ledger.settle_update(&TaskId::new("none"));
        assert_eq!(ledger.revision(), r0);
        ledger.begin_delete(TaskId::new("1"), req(1));
        assert!(ledger.revision() > r0);
    }
}
