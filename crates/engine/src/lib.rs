//! Multiplex engine
//!
//! This crate puts the lower layers together:
//! - Router: which backend owns which entity type
//! - Coordinator: one logical transaction over many backend sessions
//! - Manager: builder, configuration and the coordinator factory
//! - Metrics: commit/abort/compensation counters
//! - Backends: an in-memory backend for tests and prototyping
//!
//! The engine is the only component that knows about:
//! - Commit ordering across backends
//! - When compensation runs and what it reports

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backends;
pub mod coordinator;
pub mod manager;
pub mod metrics;
pub mod router;

pub use backends::InMemoryBackend;
pub use coordinator::{Coordinator, TransactionMode};
pub use manager::{
    BackendConfig, CompensationPolicy, MultiplexConfig, MultiplexManager, MultiplexManagerBuilder,
    CONFIG_FILE_NAME,
};
pub use metrics::{MetricsRecorder, TransactionMetrics};
pub use router::Router;
