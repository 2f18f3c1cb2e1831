//! Entity records and shared entity handles
//!
//! A [`Record`] is the plain field state of one entity: its type, identifier,
//! attributes and relation links. Records are ordinary owned values, so
//! `Record::clone` is a deep copy.
//!
//! An [`EntityRef`] is the live, shared, mutable handle that sessions hand
//! out and callers mutate in place. Two handles are the same entity only if
//! they point at the same allocation; [`EntityKey`] captures that identity
//! for use as a map key.

use crate::types::{EntityId, EntityType};
use crate::value::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Identifiers an entity links to through one relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationLinks {
    /// At most one linked entity
    ToOne(Option<EntityId>),
    /// Any number of linked entities, in insertion order, without duplicates
    ToMany(Vec<EntityId>),
}

impl RelationLinks {
    /// All linked identifiers
    pub fn ids(&self) -> Vec<EntityId> {
        match self {
            RelationLinks::ToOne(id) => id.iter().cloned().collect(),
            RelationLinks::ToMany(ids) => ids.clone(),
        }
    }
}

/// Field state of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entity_type: EntityType,
    id: Option<EntityId>,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationLinks>,
}

impl Record {
    /// Create an empty record of the given type without an identifier
    pub fn new(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Builder-style identifier
    pub fn with_id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builder-style attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder-style to-one link
    pub fn with_to_one(mut self, relation: impl Into<String>, target: impl Into<EntityId>) -> Self {
        self.relations
            .insert(relation.into(), RelationLinks::ToOne(Some(target.into())));
        self
    }

    /// Builder-style to-many links
    pub fn with_to_many<I, T>(mut self, relation: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityId>,
    {
        let mut ids: Vec<EntityId> = Vec::new();
        for target in targets {
            let id = target.into();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.relations
            .insert(relation.into(), RelationLinks::ToMany(ids));
        self
    }

    /// Runtime type of the entity
    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    /// Identifier, if one has been assigned
    pub fn id(&self) -> Option<&EntityId> {
        self.id.as_ref()
    }

    /// Assign the identifier
    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// Get an attribute value
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set an attribute value, returning the previous one
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(name.into(), value)
    }

    /// All attributes, ordered by name
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Mutable access to all attributes
    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.attributes
    }

    /// Links held under a relation name
    pub fn relation(&self, name: &str) -> Option<&RelationLinks> {
        self.relations.get(name)
    }

    /// Replace the links held under a relation name
    pub fn set_relation(&mut self, name: impl Into<String>, links: RelationLinks) {
        self.relations.insert(name.into(), links);
    }

    /// All relations, ordered by name
    pub fn relations(&self) -> &BTreeMap<String, RelationLinks> {
        &self.relations
    }

    /// Resolve a field by name for filtering and sorting
    ///
    /// `"id"` resolves to the identifier; any other name resolves to the
    /// attribute of that name, then to a to-one link. Missing fields resolve
    /// to `Null`.
    pub fn field(&self, name: &str) -> Value {
        if name == "id" {
            return self
                .id
                .as_ref()
                .map(|id| Value::String(id.as_str().to_string()))
                .unwrap_or(Value::Null);
        }
        if let Some(value) = self.attributes.get(name) {
            return value.clone();
        }
        match self.relations.get(name) {
            Some(RelationLinks::ToOne(Some(id))) => Value::String(id.as_str().to_string()),
            _ => Value::Null,
        }
    }
}

/// Identity of an entity handle
///
/// Two handles have the same key exactly when they share one allocation.
/// A key is only meaningful while some handle to the entity is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(usize);

/// Shared, mutable handle to a live entity
///
/// Cloning the handle does NOT clone the entity; all clones observe the same
/// state. Use [`EntityRef::to_record`] to obtain an independent copy.
#[derive(Clone)]
pub struct EntityRef(Arc<RwLock<Record>>);

impl EntityRef {
    /// Wrap a record into a new live entity
    pub fn new(record: Record) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    /// Identity key for this entity
    pub fn key(&self) -> EntityKey {
        EntityKey(Arc::as_ptr(&self.0) as *const () as usize)
    }

    /// Whether two handles refer to the same entity
    pub fn ptr_eq(&self, other: &EntityRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Read access to the entity state
    pub fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read()
    }

    /// Write access to the entity state
    pub fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write()
    }

    /// Runtime type of the entity
    pub fn entity_type(&self) -> EntityType {
        self.0.read().entity_type().clone()
    }

    /// Identifier, if assigned
    pub fn id(&self) -> Option<EntityId> {
        self.0.read().id().cloned()
    }

    /// Get an attribute value (cloned)
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().attribute(name).cloned()
    }

    /// Set an attribute value in place
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.write().set_attribute(name, value.into());
    }

    /// Independent copy of the current state
    pub fn to_record(&self) -> Record {
        self.0.read().clone()
    }

    /// Overwrite the entity state in place
    pub fn replace(&self, record: Record) {
        *self.0.write() = record;
    }
}

impl From<Record> for EntityRef {
    fn from(record: Record) -> Self {
        EntityRef::new(record)
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.0.read();
        write!(
            f,
            "EntityRef({}#{})",
            record.entity_type(),
            record.id().map(|id| id.as_str()).unwrap_or("?")
        )
    }
}
