//! Normalized per-type entity store.
//!
//! Holds only confirmed entities. Every mutating call bumps the store
//! revision so memoized projections built from an older revision are
//! recognised as stale without comparing contents.

use std::collections::HashMap;
use taskdeck_core::Entity;

/// Confirmed entities of one type, indexed by id, in arrival order.
///
/// Invariant: `id_order` holds exactly the keys of `by_id`, each once.
#[derive(Debug, Clone)]
pub struct EntityStore<E: Entity> {
    by_id: HashMap<E::Id, E>,
    id_order: Vec<E::Id>,
    revision: u64,
}

impl<E: Entity> Default for EntityStore<E> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            id_order: Vec::new(),
            revision: 0,
        }
    }
}

impl<E: Entity> EntityStore<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole contents, typically with a fresh fetch result.
    ///
    /// A duplicated id keeps its first position and its last payload.
    pub fn replace_all(&mut self, entities: impl IntoIterator<Item = E>) {
        self.by_id.clear();
        self.id_order.clear();
        for entity in entities {
            let id = entity.id().clone();
            if self.by_id.insert(id.clone(), entity).is_none() {
                self.id_order.push(id);
            }
        }
        self.revision += 1;
    }

    /// Insert or replace one entity. Replacing keeps the existing position.
    pub fn upsert(&mut self, entity: E) {
        let id = entity.id().clone();
        if self.by_id.insert(id.clone(), entity).is_none() {
            self.id_order.push(id);
        }
        self.revision += 1;
    }

    /// Remove an entity. Unknown ids are a no-op.
    pub fn remove(&mut self, id: &E::Id) -> Option<E> {
        let removed = self.by_id.remove(id)?;
        self.id_order.retain(|existing| existing != id);
        self.revision += 1;
        Some(removed)
    }

    pub fn get(&self, id: &E::Id) -> Option<&E> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &E::Id) -> bool {
        self.by_id.contains_key(id)
    }

    /// Owned copy of all entities in order.
    pub fn list(&self) -> Vec<E> {
        self.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.id_order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn ids(&self) -> &[E::Id] {
        &self.id_order
    }

    pub fn len(&self) -> usize {
        self.id_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_order.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
