//! Transaction bookkeeping for multiplex transactions
//!
//! This crate implements the state a coordinator keeps per transaction:
//! - Snapshot strategies and their per-type registry
//! - SnapshotStore: first-seen snapshots plus per-backend dirty logs
//! - SessionState: lifecycle of each backend session
//! - Compensation: best-effort reversal of committed backends

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compensation;
pub mod session;
pub mod snapshot;
pub mod store;

pub use compensation::{compensate, CompensationReport};
pub use session::SessionState;
pub use snapshot::{DeepClone, Snapshot, SnapshotStrategies, SnapshotStrategy};
pub use store::{CompensationStep, SnapshotStore};
