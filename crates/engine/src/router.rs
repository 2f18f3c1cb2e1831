//! Entity-type to backend routing
//!
//! The router is built once, by registering every backend, and is shared
//! read-only by every coordinator afterwards.
//!
//! ## Invariants
//!
//! - Each entity type maps to exactly one backend. A second backend
//!   claiming a type is a configuration error, reported at registration.
//! - Backend names are unique.
//! - Lookups walk the supertype chain, so a backend owning a supertype
//!   also serves its subtypes.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use strata_core::metadata::EntityMetadata;
use strata_core::traits::Backend;
use strata_core::types::{BackendId, EntityType};
use strata_core::{StrataError, StrataResult};
use tracing::debug;

/// Maps entity types to the backends that own them
pub struct Router {
    metadata: Arc<dyn EntityMetadata>,
    backends: Vec<Arc<dyn Backend>>,
    owners: FxHashMap<EntityType, BackendId>,
}

impl Router {
    /// Empty router over an entity model
    pub fn new(metadata: Arc<dyn EntityMetadata>) -> Self {
        Self {
            metadata,
            backends: Vec::new(),
            owners: FxHashMap::default(),
        }
    }

    /// Register a backend and every type it owns
    ///
    /// Registration is all-or-nothing: on error the router is unchanged.
    ///
    /// # Errors
    ///
    /// - `AmbiguousOwnership` if a type is already owned by another backend
    /// - `InvalidInput` if a backend with the same name is registered
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> StrataResult<BackendId> {
        let name = backend.name().to_string();
        if self.backends.iter().any(|b| b.name() == name) {
            return Err(StrataError::invalid_input(format!(
                "backend '{}' registered twice",
                name
            )));
        }

        let owned = backend.owned_types();
        let mut claimed: FxHashSet<&EntityType> = FxHashSet::default();
        for entity_type in &owned {
            if let Some(existing) = self.owners.get(entity_type) {
                return Err(StrataError::AmbiguousOwnership {
                    entity_type: entity_type.clone(),
                    first: self.backends[existing.index()].name().to_string(),
                    second: name,
                });
            }
            claimed.insert(entity_type);
        }

        let id = BackendId::new(self.backends.len());
        for entity_type in claimed {
            self.owners.insert(entity_type.clone(), id);
        }
        debug!(target: "strata::router", backend = %name, %id, types = owned.len(), "Backend registered");
        self.backends.push(backend);
        Ok(id)
    }

    /// Backend owning an entity type
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if neither the type nor any supertype is
    /// owned by a registered backend.
    pub fn route(&self, entity_type: &EntityType) -> StrataResult<BackendId> {
        let mut seen: FxHashSet<EntityType> = FxHashSet::default();
        let mut current = Some(entity_type.clone());
        while let Some(ty) = current {
            if let Some(id) = self.owners.get(&ty) {
                return Ok(*id);
            }
            let next = self.metadata.supertype(&ty);
            if !seen.insert(ty) {
                break;
            }
            current = next;
        }
        Err(StrataError::UnknownEntityType {
            entity_type: entity_type.clone(),
        })
    }

    /// Backend by id
    ///
    /// # Errors
    ///
    /// Returns `Internal` for an id this router never issued.
    pub fn backend(&self, id: BackendId) -> StrataResult<&Arc<dyn Backend>> {
        self.backends
            .get(id.index())
            .ok_or_else(|| StrataError::internal(format!("no backend registered as {}", id)))
    }

    /// Backend by name
    pub fn find(&self, name: &str) -> Option<BackendId> {
        self.backends
            .iter()
            .position(|b| b.name() == name)
            .map(BackendId::new)
    }

    /// Entity model the router resolves supertypes with
    pub fn metadata(&self) -> &Arc<dyn EntityMetadata> {
        &self.metadata
    }

    /// Registered backends in registration order
    pub fn backends(&self) -> impl Iterator<Item = (BackendId, &Arc<dyn Backend>)> {
        self.backends
            .iter()
            .enumerate()
            .map(|(i, b)| (BackendId::new(i), b))
    }

    /// Number of registered backends
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// True if no backend is registered
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("Router")
            .field("backends", &names)
            .field("types", &self.owners.len())
            .finish()
    }
}
