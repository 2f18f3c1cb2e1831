//! Entity snapshots for compensation
//!
//! A snapshot is the pre-mutation state of an entity, captured the first
//! time a write-mode transaction sees it. Compensation restores snapshots
//! onto backends that already committed.
//!
//! # Snapshot Guarantees
//!
//! - A snapshot never aliases the live entity: mutating the entity after
//!   capture leaves the snapshot unchanged.
//! - The first capture wins; later captures of the same entity are no-ops.
//! - An entity created inside the transaction is recorded as
//!   [`Snapshot::NewlyCreated`]; compensation deletes it.
//!
//! How a record is copied is decided per entity type by a
//! [`SnapshotStrategy`]. The default [`DeepClone`] strategy copies every
//! attribute and relation link.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use strata_core::entity::Record;
use strata_core::metadata::EntityMetadata;
use strata_core::types::EntityType;

/// Pre-mutation state of one entity
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Entity did not exist before this transaction
    NewlyCreated,
    /// Independent copy of the entity as first seen
    Prior(Arc<Record>),
}

impl Snapshot {
    /// Prior record, if the entity existed before the transaction
    pub fn prior(&self) -> Option<&Record> {
        match self {
            Snapshot::NewlyCreated => None,
            Snapshot::Prior(record) => Some(record),
        }
    }
}

/// Copies a record into an independent snapshot
///
/// Implementations must return a value that shares no mutable state with
/// the input. Strategies may drop fields that cannot or need not be
/// restored (for example, computed attributes).
pub trait SnapshotStrategy: Send + Sync {
    /// Produce the snapshot copy
    fn snapshot(&self, record: &Record) -> Record;
}

/// Deep copy of every attribute and relation link
#[derive(Debug, Clone, Copy, Default)]
pub struct DeepClone;

impl SnapshotStrategy for DeepClone {
    fn snapshot(&self, record: &Record) -> Record {
        record.clone()
    }
}

/// Snapshot strategies by entity type
///
/// Lookup walks the supertype chain, so a strategy registered for a
/// supertype applies to its subtypes. Types with no registered strategy
/// use the fallback, [`DeepClone`] unless replaced.
#[derive(Clone)]
pub struct SnapshotStrategies {
    by_type: FxHashMap<EntityType, Arc<dyn SnapshotStrategy>>,
    fallback: Arc<dyn SnapshotStrategy>,
}

impl Default for SnapshotStrategies {
    fn default() -> Self {
        Self {
            by_type: FxHashMap::default(),
            fallback: Arc::new(DeepClone),
        }
    }
}

impl std::fmt::Debug for SnapshotStrategies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.by_type.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("SnapshotStrategies")
            .field("types", &types)
            .finish_non_exhaustive()
    }
}

impl SnapshotStrategies {
    /// Registry with only the deep-clone fallback
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy for an entity type (replacing any previous one)
    pub fn register(&mut self, entity_type: EntityType, strategy: Arc<dyn SnapshotStrategy>) {
        self.by_type.insert(entity_type, strategy);
    }

    /// Replace the fallback strategy
    pub fn set_fallback(&mut self, strategy: Arc<dyn SnapshotStrategy>) {
        self.fallback = strategy;
    }

    /// Strategy for an entity type
    pub fn resolve(&self, entity_type: &EntityType, metadata: &dyn EntityMetadata) -> &dyn SnapshotStrategy {
        let mut seen: FxHashSet<EntityType> = FxHashSet::default();
        let mut current = Some(entity_type.clone());
        while let Some(ty) = current {
            if let Some(strategy) = self.by_type.get(&ty) {
                return strategy.as_ref();
            }
            let next = metadata.supertype(&ty);
            if !seen.insert(ty) {
                break;
            }
            current = next;
        }
        self.fallback.as_ref()
    }

    /// Capture a snapshot of a record using the strategy for its type
    pub fn capture(&self, record: &Record, metadata: &dyn EntityMetadata) -> Arc<Record> {
        Arc::new(self.resolve(record.entity_type(), metadata).snapshot(record))
    }
}
