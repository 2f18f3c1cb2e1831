//! In-memory backend
//!
//! Hash-map tables per entity type, shared by every session of the backend.
//! All data is lost when the backend is dropped.
//!
//! # Session Semantics
//!
//! - Identity map: loading the same id twice in one session returns the
//!   same [`EntityRef`].
//! - Writes are buffered in the session and applied to the tables in one
//!   step at commit; uncommitted writes are discarded on close.
//! - Loads see the session's own buffered creates and deletes.
//! - `create` assigns an identifier from a backend-wide counter if the
//!   entity has none.
//!
//! # Use Cases
//!
//! - Unit and integration tests (fast, no cleanup needed)
//! - Development and prototyping

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::entity::{EntityKey, EntityRef, Record, RelationLinks};
use strata_core::iterable::EntityIterable;
use strata_core::request::{EntityProjection, FilterExpression, Pagination, Relationship, Sorting};
use strata_core::traits::{Backend, Bridge, ReadSession, WriteSession};
use strata_core::types::{EntityId, EntityType, MutationKind};
use strata_core::value::Value;
use strata_core::{StrataError, StrataResult};
use tracing::debug;

type Tables = FxHashMap<EntityType, BTreeMap<EntityId, Record>>;

/// Backend keeping every entity in memory
///
/// # Thread Safety
///
/// Tables sit behind a `parking_lot::RwLock`; commits take the write lock
/// once and apply every buffered change under it.
///
/// # Example
///
/// ```ignore
/// use strata_engine::backends::InMemoryBackend;
///
/// let orders = InMemoryBackend::new("orders", ["Order"]);
/// orders.insert(Record::new("Order").with_id("1").with_attribute("status", "PENDING"));
/// ```
pub struct InMemoryBackend {
    name: String,
    types: Vec<EntityType>,
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicU64>,
    bridge: Option<Arc<dyn Bridge>>,
    properties: BTreeMap<String, Value>,
}

impl InMemoryBackend {
    /// Create an empty backend owning the given types
    pub fn new<I, T>(name: impl Into<String>, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityType>,
    {
        let types: Vec<EntityType> = types.into_iter().map(Into::into).collect();
        let mut tables = Tables::default();
        for ty in &types {
            tables.insert(ty.clone(), BTreeMap::new());
        }
        Self {
            name: name.into(),
            types,
            tables: Arc::new(RwLock::new(tables)),
            next_id: Arc::new(AtomicU64::new(1)),
            bridge: None,
            properties: BTreeMap::new(),
        }
    }

    /// Offer a bridge from every session of this backend
    pub fn with_bridge(mut self, bridge: Arc<dyn Bridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Expose a transaction property from every session
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Store a record directly, outside any session
    ///
    /// Assigns an identifier if the record has none and returns it.
    pub fn insert(&self, mut record: Record) -> EntityId {
        let id = match record.id() {
            Some(id) => id.clone(),
            None => {
                let id = allocate_id(&self.next_id, &self.tables, record.entity_type());
                record.set_id(id.clone());
                id
            }
        };
        self.tables
            .write()
            .entry(record.entity_type().clone())
            .or_default()
            .insert(id.clone(), record);
        id
    }

    /// Committed state of one entity
    pub fn get(&self, entity_type: &EntityType, id: &EntityId) -> Option<Record> {
        self.tables
            .read()
            .get(entity_type)
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// Number of committed entities of a type
    pub fn count(&self, entity_type: &EntityType) -> usize {
        self.tables
            .read()
            .get(entity_type)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    fn session(&self) -> InMemorySession {
        InMemorySession {
            backend: self.name.clone(),
            tables: Arc::clone(&self.tables),
            next_id: Arc::clone(&self.next_id),
            bridge: self.bridge.clone(),
            properties: self.properties.clone(),
            identity: FxHashMap::default(),
            pending: Vec::new(),
            pending_index: FxHashMap::default(),
            cancelled: false,
        }
    }
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("name", &self.name)
            .field("types", &self.types)
            .field("bridge", &self.bridge.is_some())
            .finish()
    }
}

impl Backend for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn owned_types(&self) -> Vec<EntityType> {
        self.types.clone()
    }

    fn begin_read_session(&self) -> StrataResult<Box<dyn ReadSession>> {
        Ok(Box::new(self.session()))
    }

    fn begin_write_session(&self) -> StrataResult<Box<dyn WriteSession>> {
        Ok(Box::new(self.session()))
    }
}

/// Next counter value not already used as an id in the type's table
fn allocate_id(next_id: &AtomicU64, tables: &RwLock<Tables>, entity_type: &EntityType) -> EntityId {
    let tables = tables.read();
    loop {
        let id = EntityId::from(next_id.fetch_add(1, Ordering::Relaxed));
        let taken = tables
            .get(entity_type)
            .map(|table| table.contains_key(&id))
            .unwrap_or(false);
        if !taken {
            return id;
        }
    }
}

// ============================================================================
// Session
// ============================================================================

struct InMemorySession {
    backend: String,
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicU64>,
    bridge: Option<Arc<dyn Bridge>>,
    properties: BTreeMap<String, Value>,
    identity: FxHashMap<(EntityType, EntityId), EntityRef>,
    pending: Vec<(EntityRef, MutationKind)>,
    pending_index: FxHashMap<EntityKey, usize>,
    cancelled: bool,
}

impl InMemorySession {
    fn ensure_live(&self) -> StrataResult<()> {
        if self.cancelled {
            return Err(StrataError::aborted(format!(
                "session on '{}' was cancelled",
                self.backend
            )));
        }
        Ok(())
    }

    fn pending_kind(&self, entity: &EntityRef) -> Option<MutationKind> {
        self.pending_index
            .get(&entity.key())
            .map(|&i| self.pending[i].1)
    }

    fn record_mutation(&mut self, entity: &EntityRef, kind: MutationKind) {
        match self.pending_index.get(&entity.key()) {
            Some(&i) => {
                let current = self.pending[i].1;
                // A create stays a create until deleted
                self.pending[i].1 = match (current, kind) {
                    (MutationKind::Created, MutationKind::Updated) => MutationKind::Created,
                    (_, next) => next,
                };
            }
            None => {
                self.pending_index.insert(entity.key(), self.pending.len());
                self.pending.push((entity.clone(), kind));
            }
        }
    }

    /// Live handle for a committed record, reusing the identity map
    fn attach(&mut self, record: &Record) -> Option<EntityRef> {
        let id = record.id()?.clone();
        let key = (record.entity_type().clone(), id);
        let entity = self
            .identity
            .entry(key)
            .or_insert_with(|| EntityRef::new(record.clone()))
            .clone();
        Some(entity)
    }

    fn lookup(&mut self, entity_type: &EntityType, id: &EntityId) -> Option<EntityRef> {
        if let Some(entity) = self.identity.get(&(entity_type.clone(), id.clone())) {
            if self.pending_kind(entity) == Some(MutationKind::Deleted) {
                return None;
            }
            return Some(entity.clone());
        }
        let record = self
            .tables
            .read()
            .get(entity_type)
            .and_then(|table| table.get(id))
            .cloned()?;
        self.attach(&record)
    }

    /// Every visible entity of a type: committed, plus buffered creates,
    /// minus buffered deletes
    fn visible(&mut self, entity_type: &EntityType) -> Vec<EntityRef> {
        let committed: Vec<Record> = self
            .tables
            .read()
            .get(entity_type)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();

        let mut visible: Vec<EntityRef> = Vec::with_capacity(committed.len());
        for record in &committed {
            if let Some(entity) = self.attach(record) {
                visible.push(entity);
            }
        }
        for (entity, kind) in &self.pending {
            if *kind == MutationKind::Created
                && entity.entity_type() == *entity_type
                && !visible.iter().any(|v| v.ptr_eq(entity))
            {
                visible.push(entity.clone());
            }
        }
        visible.retain(|e| self.pending_kind(e) != Some(MutationKind::Deleted));
        visible
    }

    fn select(
        entities: Vec<EntityRef>,
        filter: Option<&FilterExpression>,
        sorting: &Sorting,
        pagination: Option<Pagination>,
    ) -> Vec<EntityRef> {
        let mut selected: Vec<EntityRef> = match filter {
            Some(filter) => entities
                .into_iter()
                .filter(|e| filter.matches(&e.read()))
                .collect(),
            None => entities,
        };
        if !sorting.is_empty() {
            selected.sort_by(|a, b| sorting.compare(&a.read(), &b.read()));
        }
        match pagination {
            Some(window) => window.apply(selected),
            None => selected,
        }
    }

    fn relation_ids(entity: &EntityRef, relation: &str) -> Vec<EntityId> {
        entity
            .read()
            .relation(relation)
            .map(|links| links.ids())
            .unwrap_or_default()
    }

    fn require_id(&self, entity: &EntityRef) -> StrataResult<EntityId> {
        entity.id().ok_or_else(|| {
            StrataError::invalid_input(format!(
                "{:?} has no identifier; create it before saving",
                entity
            ))
        })
    }
}

impl ReadSession for InMemorySession {
    fn load(
        &mut self,
        projection: &EntityProjection,
        id: &EntityId,
    ) -> StrataResult<Option<EntityRef>> {
        self.ensure_live()?;
        let entity = match self.lookup(&projection.entity_type, id) {
            Some(entity) => entity,
            None => return Ok(None),
        };
        if let Some(filter) = &projection.filter {
            if !filter.matches(&entity.read()) {
                return Ok(None);
            }
        }
        Ok(Some(entity))
    }

    fn load_many(&mut self, projection: &EntityProjection) -> StrataResult<EntityIterable> {
        self.ensure_live()?;
        let visible = self.visible(&projection.entity_type);
        let selected = Self::select(
            visible,
            projection.filter.as_ref(),
            &projection.sorting,
            projection.pagination,
        );
        Ok(EntityIterable::from_vec(selected))
    }

    fn get_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<Option<EntityRef>> {
        self.ensure_live()?;
        let target = match entity.read().relation(&relation.name) {
            Some(RelationLinks::ToOne(Some(id))) => id.clone(),
            _ => return Ok(None),
        };
        let projection = EntityProjection {
            entity_type: target_type.clone(),
            filter: relation.filter.clone(),
            sorting: Sorting::new(),
            pagination: None,
        };
        self.load(&projection, &target)
    }

    fn get_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<EntityIterable> {
        self.ensure_live()?;
        let mut targets = Vec::new();
        for id in Self::relation_ids(entity, &relation.name) {
            if let Some(target) = self.lookup(target_type, &id) {
                targets.push(target);
            }
        }
        let selected = Self::select(
            targets,
            relation.filter.as_ref(),
            &relation.sorting,
            relation.pagination,
        );
        Ok(EntityIterable::from_vec(selected))
    }

    fn commit(&mut self) -> StrataResult<()> {
        self.ensure_live()?;
        let pending = std::mem::take(&mut self.pending);
        self.pending_index.clear();

        let mut tables = self.tables.write();
        for (entity, kind) in &pending {
            let record = entity.to_record();
            let id = match record.id() {
                Some(id) => id.clone(),
                None => continue,
            };
            let table = tables.entry(record.entity_type().clone()).or_default();
            match kind {
                MutationKind::Created | MutationKind::Updated => {
                    table.insert(id, record);
                }
                MutationKind::Deleted => {
                    table.remove(&id);
                }
            }
        }
        debug!(target: "strata::mux", backend = %self.backend, writes = pending.len(), "In-memory commit applied");
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancelled = true;
    }

    fn close(&mut self) -> StrataResult<()> {
        self.pending.clear();
        self.pending_index.clear();
        self.identity.clear();
        Ok(())
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.properties.get(name).cloned()
    }

    fn bridge(&self) -> Option<Arc<dyn Bridge>> {
        self.bridge.clone()
    }
}

impl WriteSession for InMemorySession {
    fn create(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.ensure_live()?;
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let ty = entity.entity_type();
                let id = allocate_id(&self.next_id, &self.tables, &ty);
                entity.write().set_id(id.clone());
                id
            }
        };
        self.identity
            .insert((entity.entity_type(), id), entity.clone());
        self.record_mutation(entity, MutationKind::Created);
        Ok(())
    }

    fn save(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.ensure_live()?;
        let id = self.require_id(entity)?;
        self.identity
            .entry((entity.entity_type(), id))
            .or_insert_with(|| entity.clone());
        self.record_mutation(entity, MutationKind::Updated);
        Ok(())
    }

    fn delete(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.ensure_live()?;
        self.require_id(entity)?;
        self.record_mutation(entity, MutationKind::Deleted);
        Ok(())
    }

    fn update_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        target: Option<&EntityRef>,
    ) -> StrataResult<()> {
        let target_id = match target {
            Some(t) => Some(self.require_id(t)?),
            None => None,
        };
        entity
            .write()
            .set_relation(relation, RelationLinks::ToOne(target_id));
        self.save(entity)
    }

    fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> StrataResult<()> {
        let mut ids = Self::relation_ids(entity, relation);
        for target in removed {
            let id = self.require_id(target)?;
            ids.retain(|existing| *existing != id);
        }
        for target in added {
            let id = self.require_id(target)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        entity
            .write()
            .set_relation(relation, RelationLinks::ToMany(ids));
        self.save(entity)
    }
}
