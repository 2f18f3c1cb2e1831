//! Multiplex manager: registered backends plus the shared settings every
//! coordinator starts from
//!
//! A manager is built once at startup and shared (`Arc<MultiplexManager>`).
//! Each call to [`MultiplexManager::begin_transaction`] returns a fresh,
//! request-scoped [`Coordinator`].
//!
//! ```text
//! let manager = MultiplexManager::builder(metadata)
//!     .backend(orders)
//!     .backend(shipping)
//!     .open_config(data_dir)?
//!     .build()?;
//!
//! manager.transaction(|tx| {
//!     tx.create(&order)?;
//!     tx.create(&shipment)?;
//!     Ok(())
//! })?;
//! ```

mod builder;
mod config;

pub use builder::MultiplexManagerBuilder;
pub use config::{BackendConfig, CompensationPolicy, MultiplexConfig, CONFIG_FILE_NAME};

use std::sync::Arc;
use strata_concurrency::SnapshotStrategies;
use strata_core::metadata::EntityMetadata;
use strata_core::traits::Transaction;
use strata_core::StrataResult;
use tracing::warn;

use crate::coordinator::{Coordinator, TransactionMode};
use crate::metrics::{MetricsRecorder, TransactionMetrics};
use crate::router::Router;

/// Entry point for multiplex transactions
#[derive(Debug)]
pub struct MultiplexManager {
    router: Arc<Router>,
    strategies: Arc<SnapshotStrategies>,
    policy: CompensationPolicy,
    metrics: Arc<MetricsRecorder>,
}

impl MultiplexManager {
    /// Start configuring a manager over an entity model
    pub fn builder(metadata: Arc<dyn EntityMetadata>) -> MultiplexManagerBuilder {
        MultiplexManagerBuilder::new(metadata)
    }

    pub(crate) fn from_parts(
        router: Router,
        strategies: SnapshotStrategies,
        policy: CompensationPolicy,
    ) -> Self {
        Self {
            router: Arc::new(router),
            strategies: Arc::new(strategies),
            policy,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    /// Begin a write transaction
    pub fn begin_transaction(&self) -> Coordinator {
        self.coordinator(TransactionMode::Write)
    }

    /// Begin a read-only transaction
    ///
    /// Sessions are opened read-only and no snapshots are kept; any
    /// mutation fails with `UnsupportedOperation`.
    pub fn begin_read_transaction(&self) -> Coordinator {
        self.coordinator(TransactionMode::Read)
    }

    fn coordinator(&self, mode: TransactionMode) -> Coordinator {
        Coordinator::new(
            Arc::clone(&self.router),
            Arc::clone(&self.strategies),
            self.policy.clone(),
            Arc::clone(&self.metrics),
            mode,
        )
    }

    /// Run a closure inside a write transaction
    ///
    /// Commits if the closure succeeds, cancels if it fails, and closes the
    /// coordinator either way.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, the commit failure, or a close failure
    /// when everything before it succeeded.
    pub fn transaction<F, T>(&self, f: F) -> StrataResult<T>
    where
        F: FnOnce(&mut Coordinator) -> StrataResult<T>,
    {
        let mut tx = self.begin_transaction();
        let outcome = match f(&mut tx) {
            Ok(value) => tx.commit().map(|()| value),
            Err(error) => {
                tx.cancel();
                Err(error)
            }
        };
        let closed = tx.close();
        match (outcome, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(error),
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    warn!(target: "strata::mux", error = %close_error, "Close after failed transaction also failed");
                }
                Err(error)
            }
        }
    }

    /// Routing table shared by every coordinator
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Compensation policy copied into new coordinators
    pub fn compensation_policy(&self) -> &CompensationPolicy {
        &self.policy
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.metrics.snapshot()
    }
}
