//! Strata Multiplex - one logical transaction over many data stores
//!
//! Each entity type is owned by exactly one backend. A transaction opens a
//! session on a backend the first time one of its types is touched, commits
//! every session in reverse order of first use, and, when a later commit
//! fails, reverses the backends that already committed using snapshots
//! taken during the transaction.
//!
//! # Quick Start
//!
//! ```ignore
//! use strata_multiplex::prelude::*;
//!
//! let orders = Arc::new(InMemoryBackend::new("orders", ["Order"]));
//! let shipping = Arc::new(InMemoryBackend::new("shipping", ["Shipment"]));
//!
//! let manager = MultiplexManager::builder(metadata)
//!     .backend(orders)
//!     .backend(shipping)
//!     .build()?;
//!
//! manager.transaction(|tx| {
//!     tx.create(&EntityRef::new(Record::new("Order").with_id("1")))?;
//!     tx.create(&EntityRef::new(Record::new("Shipment").with_id("s1")))?;
//!     Ok(())
//! })?;
//! ```
//!
//! # Guarantees
//!
//! Compensation is best effort, not two-phase commit. A crash between
//! backend commits, or a compensation that itself fails, can leave backends
//! inconsistent; compensation failures are attached to the returned error.

pub use strata_concurrency::{
    compensate, CompensationReport, DeepClone, SessionState, Snapshot, SnapshotStrategies,
    SnapshotStrategy,
};
pub use strata_core::*;
pub use strata_engine::{
    backends, BackendConfig, CompensationPolicy, Coordinator, InMemoryBackend, MultiplexConfig,
    MultiplexManager, MultiplexManagerBuilder, Router, TransactionMetrics, TransactionMode,
    CONFIG_FILE_NAME,
};

/// Types needed to register backends and run transactions
pub mod prelude {
    pub use strata_core::{
        Backend, Bridge, Cardinality, EntityDictionary, EntityId, EntityIterable, EntityMetadata,
        EntityProjection, EntityRef, EntityType, FilterExpression, Pagination, ReadSession,
        Record, RelationValue, Relationship, Sorting, StrataError, StrataResult, Transaction,
        Value, WriteSession,
    };
    pub use strata_engine::{
        CompensationPolicy, Coordinator, InMemoryBackend, MultiplexConfig, MultiplexManager,
    };
}
