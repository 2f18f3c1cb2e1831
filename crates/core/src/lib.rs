//! Core types and traits for Strata multiplex transactions
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified value enum for entity attributes
//! - EntityType, EntityId, BackendId, MutationKind: Identifiers
//! - Record, EntityRef, EntityKey: Entity state and shared handles
//! - EntityProjection, FilterExpression, Sorting, Pagination, Relationship:
//!   Request descriptors passed through to backends
//! - EntityIterable, RelationValue: Many-entity and relation results
//! - EntityMetadata, EntityDictionary: Entity model contract
//! - Backend, ReadSession, WriteSession, Bridge, Transaction: Contracts
//! - StrataError: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod iterable;
pub mod metadata;
pub mod request;
pub mod traits;
pub mod types;
pub mod value;

pub use entity::{EntityKey, EntityRef, Record, RelationLinks};
pub use error::{CompensationFailure, StrataError, StrataResult};
pub use iterable::{EntityIterable, InMemoryHints, RelationValue};
pub use metadata::{Cardinality, EntityDictionary, EntityDictionaryBuilder, EntityMetadata};
pub use request::{
    EntityProjection, FilterExpression, FilterPredicate, Operator, Pagination, Relationship,
    SortOrder, Sorting,
};
pub use traits::{Backend, Bridge, ReadSession, Transaction, WriteSession};
pub use types::{BackendId, EntityId, EntityType, MutationKind};
pub use value::Value;
