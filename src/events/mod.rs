//! Notification hooks for secondary indexes.
//!
//! Observers are wired once at composition time and fired synchronously after
//! the owning transaction commits. A hook failure must never affect the
//! outcome of the triggering operation: the secondary index is eventually
//! consistent and independently rebuildable from the change log, so failures
//! are logged and swallowed here.

use std::sync::Arc;

use tracing::warn;

use crate::models::{Entity, Note};

/// Receiver for post-commit notifications.
///
/// All methods default to no-ops so an observer only implements the events
/// it cares about.
pub trait StoreObserver: Send + Sync {
    fn on_entity_saved(&self, entity: &Entity) -> anyhow::Result<()> {
        let _ = entity;
        Ok(())
    }

    fn on_entity_deleted(&self, entity: &Entity) -> anyhow::Result<()> {
        let _ = entity;
        Ok(())
    }

    fn on_note_saved(&self, note: &Note) -> anyhow::Result<()> {
        let _ = note;
        Ok(())
    }

    fn on_note_deleted(&self, note: &Note) -> anyhow::Result<()> {
        let _ = note;
        Ok(())
    }
}

/// The observer list. Built at composition time; not mutated during normal
/// operation.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        ObserverSet::default()
    }

    pub fn register(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn entity_saved(&self, entity: &Entity) {
        for observer in &self.observers {
            if let Err(err) = observer.on_entity_saved(entity) {
                warn!(entity_id = %entity.id, error = %err, "entity-saved hook failed");
            }
        }
    }

    pub(crate) fn entity_deleted(&self, entity: &Entity) {
        for observer in &self.observers {
            if let Err(err) = observer.on_entity_deleted(entity) {
                warn!(entity_id = %entity.id, error = %err, "entity-deleted hook failed");
            }
        }
    }

    pub(crate) fn note_saved(&self, note: &Note) {
        for observer in &self.observers {
            if let Err(err) = observer.on_note_saved(note) {
                warn!(note_id = %note.id, error = %err, "note-saved hook failed");
            }
        }
    }

    pub(crate) fn note_deleted(&self, note: &Note) {
        for observer in &self.observers {
            if let Err(err) = observer.on_note_deleted(note) {
                warn!(note_id = %note.id, error = %err, "note-deleted hook failed");
            }
        }
    }
}
