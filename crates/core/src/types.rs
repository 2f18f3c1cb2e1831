//! Identifier types for the multiplex layer
//!
//! This module defines the foundational identifiers:
//! - EntityType: Name of an entity type, the unit of backend ownership
//! - EntityId: Identifier of one entity within its type
//! - BackendId: Position of a backend in the router's registration order
//! - MutationKind: What a write session did to an entity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of an entity type
///
/// Every entity type is owned by exactly one backend. The router maps
/// types to backends, and the entity dictionary describes relations
/// and the type hierarchy in terms of these names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityType(String);

impl EntityType {
    /// Create an entity type from its name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the type name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of an entity within its type
///
/// Backends are free to use numeric or textual identifiers; both are
/// carried as strings so identifiers from different backends can be
/// compared and passed through filters uniformly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Create an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for EntityId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Identifier of a registered backend
///
/// Assigned by the router in registration order and stable for the life
/// of the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendId(usize);

impl BackendId {
    /// Create a backend id from a registration index
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Registration index
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend#{}", self.0)
    }
}

/// Kind of mutation a write session recorded against an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Entity was created in this session
    Created,
    /// Entity state was updated in this session
    Updated,
    /// Entity was deleted in this session
    Deleted,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Created => write!(f, "created"),
            MutationKind::Updated => write!(f, "updated"),
            MutationKind::Deleted => write!(f, "deleted"),
        }
    }
}
