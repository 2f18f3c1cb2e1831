//! Request descriptors passed through to backends
//!
//! The coordinator never interprets these beyond routing on the entity
//! type; backends translate them into their own query language. The
//! in-memory evaluation helpers ([`FilterExpression::matches`],
//! [`Sorting::compare`], [`Pagination::apply`]) exist for backends that
//! evaluate requests directly against records.

use crate::entity::Record;
use crate::types::EntityType;
use crate::value::Value;
use std::cmp::Ordering;

// ============================================================================
// Filters
// ============================================================================

/// Comparison applied by a filter predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Field equals one of the values
    In,
    /// Field equals none of the values
    NotIn,
    /// Field is null or missing
    IsNull,
    /// Field is present and not null
    NotNull,
    /// Field sorts before the first value
    LessThan,
    /// Field sorts after the first value
    GreaterThan,
}

/// Single-field predicate
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPredicate {
    /// Field name; `"id"` addresses the identifier
    pub field: String,
    /// Comparison
    pub operator: Operator,
    /// Operand values
    pub values: Vec<Value>,
}

/// Filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// Leaf predicate
    Predicate(FilterPredicate),
    /// All children match
    And(Vec<FilterExpression>),
    /// Any child matches
    Or(Vec<FilterExpression>),
    /// Child does not match
    Not(Box<FilterExpression>),
}

impl FilterExpression {
    /// `field IN (value)`
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::in_values(field, vec![value.into()])
    }

    /// `field IN (values...)`
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        FilterExpression::Predicate(FilterPredicate {
            field: field.into(),
            operator: Operator::In,
            values,
        })
    }

    /// Predicate with an explicit operator
    pub fn predicate(field: impl Into<String>, operator: Operator, values: Vec<Value>) -> Self {
        FilterExpression::Predicate(FilterPredicate {
            field: field.into(),
            operator,
            values,
        })
    }

    /// Conjunction
    pub fn and(self, other: FilterExpression) -> Self {
        match self {
            FilterExpression::And(mut children) => {
                children.push(other);
                FilterExpression::And(children)
            }
            first => FilterExpression::And(vec![first, other]),
        }
    }

    /// Disjunction
    pub fn or(self, other: FilterExpression) -> Self {
        match self {
            FilterExpression::Or(mut children) => {
                children.push(other);
                FilterExpression::Or(children)
            }
            first => FilterExpression::Or(vec![first, other]),
        }
    }

    /// Negation
    pub fn negate(self) -> Self {
        FilterExpression::Not(Box::new(self))
    }

    /// Evaluate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            FilterExpression::Predicate(p) => p.matches(record),
            FilterExpression::And(children) => children.iter().all(|c| c.matches(record)),
            FilterExpression::Or(children) => children.iter().any(|c| c.matches(record)),
            FilterExpression::Not(child) => !child.matches(record),
        }
    }
}

impl FilterPredicate {
    fn matches(&self, record: &Record) -> bool {
        let field = record.field(&self.field);
        match self.operator {
            Operator::In => self.values.iter().any(|v| *v == field),
            Operator::NotIn => !self.values.iter().any(|v| *v == field),
            Operator::IsNull => field.is_null(),
            Operator::NotNull => !field.is_null(),
            Operator::LessThan => self
                .values
                .first()
                .map(|v| !field.is_null() && field.sort_cmp(v) == Ordering::Less)
                .unwrap_or(false),
            Operator::GreaterThan => self
                .values
                .first()
                .map(|v| !field.is_null() && field.sort_cmp(v) == Ordering::Greater)
                .unwrap_or(false),
        }
    }
}

// ============================================================================
// Sorting and pagination
// ============================================================================

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

/// Ordered list of sort keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sorting {
    keys: Vec<(String, SortOrder)>,
}

impl Sorting {
    /// Empty sorting (backend order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Single ascending key
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new().then(field, SortOrder::Ascending)
    }

    /// Single descending key
    pub fn descending(field: impl Into<String>) -> Self {
        Self::new().then(field, SortOrder::Descending)
    }

    /// Append a key
    pub fn then(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.keys.push((field.into(), order));
        self
    }

    /// Sort keys, most significant first
    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }

    /// True if no keys are set
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Compare two records by the sort keys
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (field, order) in &self.keys {
            let ord = a.field(field).sort_cmp(&b.field(field));
            let ord = match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Items to skip
    pub offset: usize,
    /// Maximum items to return
    pub limit: usize,
}

impl Pagination {
    /// Create a window
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Apply the window to an already ordered list
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

// ============================================================================
// Projections
// ============================================================================

/// What to load: an entity type plus optional filter, sorting and paging
#[derive(Debug, Clone, PartialEq)]
pub struct EntityProjection {
    /// Requested entity type
    pub entity_type: EntityType,
    /// Optional filter
    pub filter: Option<FilterExpression>,
    /// Sorting (empty for backend order)
    pub sorting: Sorting,
    /// Optional window
    pub pagination: Option<Pagination>,
}

impl EntityProjection {
    /// Projection over every entity of a type
    pub fn of(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: None,
            sorting: Sorting::new(),
            pagination: None,
        }
    }

    /// Builder-style filter
    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder-style sorting
    pub fn with_sorting(mut self, sorting: Sorting) -> Self {
        self.sorting = sorting;
        self
    }

    /// Builder-style pagination
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// Relation fetch request
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Relation name on the owning entity
    pub name: String,
    /// Optional filter on the targets
    pub filter: Option<FilterExpression>,
    /// Sorting of to-many targets
    pub sorting: Sorting,
    /// Window over to-many targets
    pub pagination: Option<Pagination>,
}

impl Relationship {
    /// Plain relation fetch
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            sorting: Sorting::new(),
            pagination: None,
        }
    }

    /// Builder-style filter
    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Builder-style sorting
    pub fn with_sorting(mut self, sorting: Sorting) -> Self {
        self.sorting = sorting;
        self
    }

    /// Builder-style pagination
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}
