//! Best-effort reversal of committed backends
//!
//! When a later backend's commit fails, every backend that already
//! committed (and is marked compensable) is reversed through a fresh write
//! session:
//!
//! 1. Entities created by the transaction are deleted
//! 2. Entities with a prior snapshot are saved back in their prior state
//! 3. Entities without a snapshot are skipped
//! 4. The fresh session is committed
//!
//! Failures never stop the pass: each is recorded as a
//! [`CompensationFailure`] and the next backend is still reversed.
//! Consistency cannot be guaranteed if compensation itself fails.

use crate::store::{CompensationStep, SnapshotStore};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use strata_core::entity::EntityRef;
use strata_core::error::{CompensationFailure, StrataError, StrataResult};
use strata_core::traits::{Backend, WriteSession};
use strata_core::types::BackendId;
use tracing::{debug, info, warn};

/// Outcome of a compensation pass
#[derive(Debug, Default)]
pub struct CompensationReport {
    /// Backends fully reversed, in the order they were processed
    pub reversed: Vec<String>,
    /// Entities skipped for lack of a snapshot
    pub skipped: usize,
    /// Failures recorded along the way
    pub failures: Vec<CompensationFailure>,
}

impl CompensationReport {
    /// True if every backend was reversed without failure
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Reverse every committed backend
///
/// # Arguments
///
/// * `committed` - Backends that committed, in commit order
/// * `store` - Snapshots and dirty logs of the failed transaction
pub fn compensate(committed: &[(BackendId, Arc<dyn Backend>)], store: &SnapshotStore) -> CompensationReport {
    let mut report = CompensationReport::default();
    if committed.is_empty() {
        return report;
    }

    info!(
        target: "strata::compensation",
        backends = committed.len(),
        "Compensating committed backends"
    );

    for (id, backend) in committed {
        let name = backend.name().to_string();
        let plan = store.compensation_plan(*id);
        let outcome = catch_unwind(AssertUnwindSafe(|| reverse_backend(backend.as_ref(), plan)));
        match outcome {
            Ok(Ok(skipped)) => {
                debug!(target: "strata::compensation", backend = %name, skipped, "Backend reversed");
                report.skipped += skipped;
                report.reversed.push(name);
            }
            Ok(Err(error)) => {
                warn!(target: "strata::compensation", backend = %name, error = %error, "Compensation failed");
                report.failures.push(CompensationFailure { backend: name, error });
            }
            Err(_) => {
                warn!(target: "strata::compensation", backend = %name, "Compensation panicked");
                report.failures.push(CompensationFailure {
                    backend: name,
                    error: StrataError::internal("panic during compensation"),
                });
            }
        }
    }

    info!(
        target: "strata::compensation",
        reversed = report.reversed.len(),
        failed = report.failures.len(),
        "Compensation finished"
    );
    report
}

/// Apply one backend's plan in a fresh session; returns the skip count
fn reverse_backend(backend: &dyn Backend, plan: Vec<CompensationStep>) -> StrataResult<usize> {
    let mut session = backend.begin_write_session()?;
    match apply_plan(session.as_mut(), plan) {
        Ok(skipped) => {
            session.close()?;
            Ok(skipped)
        }
        Err(error) => {
            session.cancel();
            if let Err(close_error) = session.close() {
                debug!(
                    target: "strata::compensation",
                    backend = backend.name(),
                    error = %close_error,
                    "Close after failed compensation also failed"
                );
            }
            Err(error)
        }
    }
}

fn apply_plan(session: &mut dyn WriteSession, plan: Vec<CompensationStep>) -> StrataResult<usize> {
    let mut skipped = 0;
    for step in plan {
        match step {
            CompensationStep::Delete(entity) => session.delete(&entity)?,
            CompensationStep::Restore(record) => session.save(&EntityRef::new(record))?,
            CompensationStep::Skip(entity) => {
                debug!(target: "strata::compensation", entity = ?entity, "No snapshot, skipping");
                skipped += 1;
            }
        }
    }
    session.flush()?;
    session.commit()?;
    Ok(skipped)
}
