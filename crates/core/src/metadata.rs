//! Entity metadata contract
//!
//! The coordinator needs three facts about the entity model: the runtime
//! type of a live entity, the target type of a relation, and the supertype
//! chain used for routing. [`EntityMetadata`] is the seam; the bundled
//! [`EntityDictionary`] is a plain in-memory implementation built once at
//! startup.

use crate::entity::EntityRef;
use crate::error::{StrataError, StrataResult};
use crate::types::EntityType;
use rustc_hash::FxHashMap;

/// Whether a relation links to one or many targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one target
    ToOne,
    /// Any number of targets
    ToMany,
}

/// Entity model queries used by the router and coordinator
pub trait EntityMetadata: Send + Sync {
    /// Runtime type of a live entity
    fn type_of(&self, entity: &EntityRef) -> EntityType {
        entity.entity_type()
    }

    /// Target type of a relation on an entity type
    fn relation_target_type(&self, entity_type: &EntityType, relation: &str)
        -> StrataResult<EntityType>;

    /// Whether the relation is to-many
    fn relation_is_to_many(&self, entity_type: &EntityType, relation: &str) -> StrataResult<bool>;

    /// Direct supertype, if any
    fn supertype(&self, _entity_type: &EntityType) -> Option<EntityType> {
        None
    }
}

#[derive(Debug, Clone)]
struct RelationInfo {
    target: EntityType,
    cardinality: Cardinality,
}

#[derive(Debug, Clone, Default)]
struct TypeInfo {
    supertype: Option<EntityType>,
    relations: FxHashMap<String, RelationInfo>,
}

/// In-memory entity dictionary
///
/// Relations declared on a supertype are visible on every subtype.
#[derive(Debug, Clone, Default)]
pub struct EntityDictionary {
    types: FxHashMap<EntityType, TypeInfo>,
}

impl EntityDictionary {
    /// Start building a dictionary
    pub fn builder() -> EntityDictionaryBuilder {
        EntityDictionaryBuilder::default()
    }

    /// Whether the type has been declared
    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.types.contains_key(entity_type)
    }

    fn find_relation(&self, entity_type: &EntityType, relation: &str) -> StrataResult<&RelationInfo> {
        let mut current = Some(entity_type);
        // Bounded walk; a cyclic hierarchy is rejected at build time.
        while let Some(ty) = current {
            let info = match self.types.get(ty) {
                Some(info) => info,
                None => break,
            };
            if let Some(rel) = info.relations.get(relation) {
                return Ok(rel);
            }
            current = info.supertype.as_ref();
        }
        Err(StrataError::UnknownRelation {
            entity_type: entity_type.clone(),
            relation: relation.to_string(),
        })
    }
}

impl EntityMetadata for EntityDictionary {
    fn relation_target_type(
        &self,
        entity_type: &EntityType,
        relation: &str,
    ) -> StrataResult<EntityType> {
        self.find_relation(entity_type, relation)
            .map(|rel| rel.target.clone())
    }

    fn relation_is_to_many(&self, entity_type: &EntityType, relation: &str) -> StrataResult<bool> {
        self.find_relation(entity_type, relation)
            .map(|rel| rel.cardinality == Cardinality::ToMany)
    }

    fn supertype(&self, entity_type: &EntityType) -> Option<EntityType> {
        self.types
            .get(entity_type)
            .and_then(|info| info.supertype.clone())
    }
}

/// Builder for [`EntityDictionary`]
#[derive(Debug, Default)]
pub struct EntityDictionaryBuilder {
    types: FxHashMap<EntityType, TypeInfo>,
}

impl EntityDictionaryBuilder {
    /// Declare an entity type
    pub fn entity(mut self, entity_type: impl Into<EntityType>) -> Self {
        self.types.entry(entity_type.into()).or_default();
        self
    }

    /// Declare a relation (the owning and target types are declared implicitly)
    ///
    /// # Arguments
    ///
    /// * `entity_type` - Owning type
    /// * `name` - Relation name
    /// * `target` - Target type
    /// * `cardinality` - To-one or to-many
    pub fn relation(
        mut self,
        entity_type: impl Into<EntityType>,
        name: impl Into<String>,
        target: impl Into<EntityType>,
        cardinality: Cardinality,
    ) -> Self {
        let target = target.into();
        self.types.entry(target.clone()).or_default();
        self.types
            .entry(entity_type.into())
            .or_default()
            .relations
            .insert(name.into(), RelationInfo { target, cardinality });
        self
    }

    /// Declare `subtype` as a direct subtype of `supertype`
    pub fn subtype(mut self, subtype: impl Into<EntityType>, supertype: impl Into<EntityType>) -> Self {
        let supertype = supertype.into();
        self.types.entry(supertype.clone()).or_default();
        self.types.entry(subtype.into()).or_default().supertype = Some(supertype);
        self
    }

    /// Finish the dictionary
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the supertype declarations form a cycle.
    pub fn build(self) -> StrataResult<EntityDictionary> {
        for start in self.types.keys() {
            let mut steps = 0usize;
            let mut current = self.types.get(start).and_then(|t| t.supertype.as_ref());
            while let Some(ty) = current {
                steps += 1;
                if ty == start || steps > self.types.len() {
                    return Err(StrataError::invalid_input(format!(
                        "cyclic type hierarchy through {}",
                        start
                    )));
                }
                current = self.types.get(ty).and_then(|t| t.supertype.as_ref());
            }
        }
        Ok(EntityDictionary { types: self.types })
    }
}
