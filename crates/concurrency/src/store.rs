//! Per-transaction snapshot store
//!
//! Tracks, for one write-mode transaction:
//! - the first-seen snapshot of every entity it loaded or created
//! - per backend, the ordered list of entities it mutated (the dirty log)
//!
//! Entities are identified by handle identity ([`EntityKey`]), never by
//! value. The store keeps a handle to every tracked entity so keys stay
//! unique for the life of the transaction.

use crate::snapshot::Snapshot;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use strata_core::entity::{EntityKey, EntityRef, Record};
use strata_core::types::BackendId;

/// One action needed to reverse a committed entity change
#[derive(Debug, Clone)]
pub enum CompensationStep {
    /// Entity was created by the transaction; delete it
    Delete(EntityRef),
    /// Entity existed before; write the prior state back
    Restore(Record),
    /// No snapshot was captured; nothing can be done
    Skip(EntityRef),
}

#[derive(Debug, Default)]
struct DirtyLog {
    order: Vec<EntityRef>,
    seen: FxHashSet<EntityKey>,
}

impl DirtyLog {
    fn push(&mut self, entity: &EntityRef) {
        if self.seen.insert(entity.key()) {
            self.order.push(entity.clone());
        }
    }
}

/// Snapshots and dirty logs of one write transaction
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: FxHashMap<EntityKey, Snapshot>,
    held: FxHashMap<EntityKey, EntityRef>,
    dirty: FxHashMap<BackendId, DirtyLog>,
}

impl SnapshotStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the prior state of a loaded entity
    ///
    /// The capture closure runs only if the entity has no snapshot yet.
    /// Returns true if a snapshot was recorded by this call.
    pub fn capture_with<F>(&mut self, entity: &EntityRef, capture: F) -> bool
    where
        F: FnOnce(&Record) -> Arc<Record>,
    {
        let key = entity.key();
        if self.snapshots.contains_key(&key) {
            return false;
        }
        let prior = {
            let record = entity.read();
            capture(&record)
        };
        self.snapshots.insert(key, Snapshot::Prior(prior));
        self.held.insert(key, entity.clone());
        true
    }

    /// Record an entity created by the transaction and log it as dirty
    pub fn mark_created(&mut self, backend: BackendId, entity: &EntityRef) {
        let key = entity.key();
        self.snapshots.entry(key).or_insert(Snapshot::NewlyCreated);
        self.held.insert(key, entity.clone());
        self.dirty.entry(backend).or_default().push(entity);
    }

    /// Log an entity as mutated on a backend
    ///
    /// No snapshot is taken here; an entity never captured before stays
    /// without one and compensation skips it.
    pub fn mark_dirty(&mut self, backend: BackendId, entity: &EntityRef) {
        self.held.entry(entity.key()).or_insert_with(|| entity.clone());
        self.dirty.entry(backend).or_default().push(entity);
    }

    /// Snapshot of an entity, if one was captured
    pub fn snapshot(&self, entity: &EntityRef) -> Option<&Snapshot> {
        self.snapshots.get(&entity.key())
    }

    /// Entities mutated on a backend, in first-mutation order
    pub fn dirty(&self, backend: BackendId) -> &[EntityRef] {
        self.dirty
            .get(&backend)
            .map(|log| log.order.as_slice())
            .unwrap_or(&[])
    }

    /// Steps reversing every mutation logged for a backend
    pub fn compensation_plan(&self, backend: BackendId) -> Vec<CompensationStep> {
        self.dirty(backend)
            .iter()
            .map(|entity| match self.snapshots.get(&entity.key()) {
                Some(Snapshot::NewlyCreated) => CompensationStep::Delete(entity.clone()),
                Some(Snapshot::Prior(record)) => CompensationStep::Restore(Record::clone(record)),
                None => CompensationStep::Skip(entity.clone()),
            })
            .collect()
    }

    /// Number of captured snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True if nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop all snapshots and dirty logs
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.held.clear();
        self.dirty.clear();
    }
}
