//! Lazily evaluated entity sequences
//!
//! Backends return many-entity results as an [`EntityIterable`]: a boxed
//! cursor plus hints telling the caller which parts of the request the
//! backend could not push down and still need to be applied in memory.

use crate::entity::EntityRef;
use crate::error::StrataResult;
use std::fmt;

/// Request parts a backend left for in-memory evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryHints {
    /// Filter still needs to be applied
    pub filter: bool,
    /// Sorting still needs to be applied
    pub sort: bool,
    /// Pagination still needs to be applied
    pub paginate: bool,
}

impl InMemoryHints {
    /// Everything must be evaluated in memory
    pub fn all() -> Self {
        Self {
            filter: true,
            sort: true,
            paginate: true,
        }
    }
}

type Cursor = Box<dyn Iterator<Item = StrataResult<EntityRef>> + Send>;

/// Sequence of entities produced by a backend
///
/// Iteration may fail part-way if the backend cursor fails; each item is a
/// `StrataResult`.
pub struct EntityIterable {
    cursor: Cursor,
    hints: InMemoryHints,
}

impl EntityIterable {
    /// Wrap a backend cursor
    pub fn from_cursor<I>(cursor: I) -> Self
    where
        I: Iterator<Item = StrataResult<EntityRef>> + Send + 'static,
    {
        Self {
            cursor: Box::new(cursor),
            hints: InMemoryHints::default(),
        }
    }

    /// Already materialized entities
    pub fn from_vec(entities: Vec<EntityRef>) -> Self {
        Self::from_cursor(entities.into_iter().map(Ok))
    }

    /// No entities
    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Builder-style hints
    pub fn with_hints(mut self, hints: InMemoryHints) -> Self {
        self.hints = hints;
        self
    }

    /// In-memory evaluation hints
    pub fn hints(&self) -> InMemoryHints {
        self.hints
    }

    /// Drain the cursor, stopping at the first failure
    pub fn collect_all(self) -> StrataResult<Vec<EntityRef>> {
        self.cursor.collect()
    }
}

impl Iterator for EntityIterable {
    type Item = StrataResult<EntityRef>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }
}

impl fmt::Debug for EntityIterable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityIterable")
            .field("hints", &self.hints)
            .finish_non_exhaustive()
    }
}

/// Result of a relation fetch
#[derive(Debug)]
pub enum RelationValue {
    /// To-one relation: the target, if linked
    ToOne(Option<EntityRef>),
    /// To-many relation: the targets
    ToMany(EntityIterable),
}

impl RelationValue {
    /// The to-one target; `None` for to-many or unlinked
    pub fn into_single(self) -> Option<EntityRef> {
        match self {
            RelationValue::ToOne(target) => target,
            RelationValue::ToMany(_) => None,
        }
    }

    /// All targets, materialized
    pub fn into_vec(self) -> StrataResult<Vec<EntityRef>> {
        match self {
            RelationValue::ToOne(target) => Ok(target.into_iter().collect()),
            RelationValue::ToMany(iterable) => iterable.collect_all(),
        }
    }
}
