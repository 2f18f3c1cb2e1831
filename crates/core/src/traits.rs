//! Backend, session, bridge and transaction contracts
//!
//! This module defines the seams between the coordinator and the storage
//! engines it drives:
//!
//! - [`Backend`]: a named storage engine owning a fixed set of entity types
//! - [`ReadSession`] / [`WriteSession`]: one unit of work against a backend
//! - [`Bridge`]: optional session capability for relations whose target
//!   lives in a different backend
//! - [`Transaction`]: the logical transaction the caller sees, implemented
//!   by the coordinator and handed to bridges for re-entrant loads

use std::sync::Arc;

use crate::entity::EntityRef;
use crate::error::StrataResult;
use crate::iterable::EntityIterable;
use crate::iterable::RelationValue;
use crate::request::{EntityProjection, Relationship};
use crate::types::{EntityId, EntityType};
use crate::value::Value;

/// A storage engine that owns a set of entity types
///
/// Thread safety: backends are shared by every transaction in the process
/// and must be safe to use concurrently (requires Send + Sync). Sessions
/// are owned by one transaction and only need to be Send.
pub trait Backend: Send + Sync {
    /// Stable backend name, used in logs, errors, configuration and
    /// property prefixes
    fn name(&self) -> &str;

    /// Entity types this backend owns
    fn owned_types(&self) -> Vec<EntityType>;

    /// Open a read-only session
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a session.
    fn begin_read_session(&self) -> StrataResult<Box<dyn ReadSession>>;

    /// Open a read-write session
    ///
    /// Compensation also opens write sessions through this method, after
    /// the original session for the backend has committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a session.
    fn begin_write_session(&self) -> StrataResult<Box<dyn WriteSession>>;
}

/// Read operations and lifecycle of one backend session
pub trait ReadSession: Send {
    /// Load one entity by identifier
    ///
    /// Returns `None` if no entity of the projected type has that id.
    fn load(&mut self, projection: &EntityProjection, id: &EntityId)
        -> StrataResult<Option<EntityRef>>;

    /// Load every entity matching the projection
    fn load_many(&mut self, projection: &EntityProjection) -> StrataResult<EntityIterable>;

    /// Read an attribute of a loaded entity
    fn get_attribute(&mut self, entity: &EntityRef, name: &str) -> StrataResult<Option<Value>> {
        Ok(entity.get(name))
    }

    /// Fetch a to-one relation whose target this backend owns
    fn get_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<Option<EntityRef>>;

    /// Fetch a to-many relation whose targets this backend owns
    fn get_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<EntityIterable>;

    /// Push buffered changes to the backend without committing
    fn flush(&mut self) -> StrataResult<()> {
        Ok(())
    }

    /// Last chance to validate before commit
    fn pre_commit(&mut self) -> StrataResult<()> {
        Ok(())
    }

    /// Commit the session
    fn commit(&mut self) -> StrataResult<()>;

    /// Ask any in-flight work to stop; best effort
    fn cancel(&mut self) {}

    /// Release the session
    fn close(&mut self) -> StrataResult<()> {
        Ok(())
    }

    /// Backend-specific transaction property
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Cross-backend relation capability, if this session offers one
    fn bridge(&self) -> Option<Arc<dyn Bridge>> {
        None
    }
}

/// Mutating operations of one backend session
pub trait WriteSession: ReadSession {
    /// Persist a new entity; the session may assign its identifier
    fn create(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Persist changes to an existing entity
    fn save(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Remove an entity
    fn delete(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Set an attribute and record the entity as changed
    fn set_attribute(&mut self, entity: &EntityRef, name: &str, value: Value) -> StrataResult<()> {
        entity.set(name, value);
        self.save(entity)
    }

    /// Replace the target of a to-one relation
    fn update_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        target: Option<&EntityRef>,
    ) -> StrataResult<()>;

    /// Add and remove targets of a to-many relation
    fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> StrataResult<()>;
}

/// Resolves relations whose target lives in another backend
///
/// A bridge receives the logical transaction so it can load the related
/// entities through the coordinator, which routes them to the backend that
/// owns them. Filter, sorting and pagination arrive unchanged inside the
/// [`Relationship`].
pub trait Bridge: Send + Sync {
    /// Resolve a to-one cross-backend relation
    fn bridge_load(
        &self,
        tx: &mut dyn Transaction,
        source: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<Option<EntityRef>>;

    /// Resolve a to-many cross-backend relation
    fn bridge_load_many(
        &self,
        tx: &mut dyn Transaction,
        source: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<EntityIterable>;
}

/// One logical transaction spanning any number of backends
pub trait Transaction {
    /// Load one entity by identifier
    fn load(&mut self, projection: &EntityProjection, id: &EntityId)
        -> StrataResult<Option<EntityRef>>;

    /// Load every entity matching the projection
    fn load_many(&mut self, projection: &EntityProjection) -> StrataResult<EntityIterable>;

    /// Persist a new entity
    fn create(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Persist changes to an entity
    fn save(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Remove an entity
    fn delete(&mut self, entity: &EntityRef) -> StrataResult<()>;

    /// Read an attribute
    fn get_attribute(&mut self, entity: &EntityRef, name: &str) -> StrataResult<Option<Value>>;

    /// Change an attribute
    fn set_attribute(&mut self, entity: &EntityRef, name: &str, value: Value) -> StrataResult<()>;

    /// Fetch a relation of an entity
    fn get_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<RelationValue>;

    /// Replace the target of a to-one relation
    fn update_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        target: Option<&EntityRef>,
    ) -> StrataResult<()>;

    /// Add and remove targets of a to-many relation
    fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> StrataResult<()>;

    /// Flush every open session
    fn flush(&mut self) -> StrataResult<()>;

    /// Run pre-commit checks on every open session
    fn pre_commit(&mut self) -> StrataResult<()>;

    /// Commit every open session
    fn commit(&mut self) -> StrataResult<()>;

    /// Ask every open session to stop in-flight work
    fn cancel(&mut self);

    /// Close every open session
    fn close(&mut self) -> StrataResult<()>;

    /// Backend-specific property, addressed as `"<backend>.<key>"`
    fn property(&mut self, name: &str) -> StrataResult<Option<Value>>;
}
