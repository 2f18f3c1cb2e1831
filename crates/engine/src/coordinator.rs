//! Multiplex coordinator: one logical transaction across many backends
//!
//! The coordinator lazily opens at most one session per backend, in the
//! order backends are first touched, and drives them through a single
//! commit:
//!
//! - `flush` and `pre_commit` run in session-creation order
//! - `commit` flushes, then commits sessions in REVERSE creation order
//! - `close` runs in reverse creation order and aggregates failures
//!
//! In write mode every entity the caller sees is snapshotted at first
//! touch. If a commit fails after other backends already committed, those
//! backends are reversed from the snapshots (best effort) before the
//! original failure is returned.
//!
//! A coordinator is request-scoped and not safe for concurrent use; the
//! router and backends behind it are shared across coordinators.

use smallvec::SmallVec;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use strata_concurrency::{compensate, SessionState, Snapshot, SnapshotStore, SnapshotStrategies};
use strata_core::entity::EntityRef;
use strata_core::iterable::{EntityIterable, RelationValue};
use strata_core::request::{EntityProjection, Relationship};
use strata_core::traits::{Backend, ReadSession, Transaction, WriteSession};
use strata_core::types::{BackendId, EntityId};
use strata_core::value::Value;
use strata_core::{StrataError, StrataResult};
use tracing::{debug, info, warn};

use crate::manager::CompensationPolicy;
use crate::metrics::MetricsRecorder;
use crate::router::Router;

/// Whether a coordinator may mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Read sessions only; mutations fail with `UnsupportedOperation`
    Read,
    /// Write sessions with snapshot tracking
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Active,
    Committed,
    Failed,
    Closed,
}

enum SessionHandle {
    Read(Box<dyn ReadSession>),
    Write(Box<dyn WriteSession>),
}

/// Run the same expression against either kind of session
macro_rules! with_session {
    ($handle:expr, $session:ident => $body:expr) => {
        match $handle {
            SessionHandle::Read($session) => $body,
            SessionHandle::Write($session) => $body,
        }
    };
}

impl SessionHandle {
    /// Write access, or `UnsupportedOperation` for a read session
    fn writer(&mut self, operation: &str) -> StrataResult<&mut dyn WriteSession> {
        match self {
            SessionHandle::Write(session) => Ok(session.as_mut()),
            SessionHandle::Read(_) => Err(StrataError::unsupported(format!(
                "{} on a read session",
                operation
            ))),
        }
    }
}

struct SessionSlot {
    id: BackendId,
    backend: Arc<dyn Backend>,
    handle: SessionHandle,
    state: SessionState,
}

/// Coordinates one logical transaction across backends
pub struct Coordinator {
    router: Arc<Router>,
    strategies: Arc<SnapshotStrategies>,
    policy: CompensationPolicy,
    metrics: Arc<MetricsRecorder>,
    mode: TransactionMode,
    slots: Vec<SessionSlot>,
    snapshots: SnapshotStore,
    status: Status,
}

impl Coordinator {
    /// Create an empty coordinator; no session is opened until first use
    ///
    /// # Arguments
    ///
    /// * `router` - Type-to-backend routing shared by all coordinators
    /// * `strategies` - Snapshot strategies per entity type
    /// * `policy` - Which backends are compensated, fixed for this transaction
    /// * `metrics` - Shared transaction counters
    /// * `mode` - Read or write
    pub fn new(
        router: Arc<Router>,
        strategies: Arc<SnapshotStrategies>,
        policy: CompensationPolicy,
        metrics: Arc<MetricsRecorder>,
        mode: TransactionMode,
    ) -> Self {
        metrics.record_start();
        Self {
            router,
            strategies,
            policy,
            metrics,
            mode,
            slots: Vec::new(),
            snapshots: SnapshotStore::new(),
            status: Status::Active,
        }
    }

    /// Read or write
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.slots.len()
    }

    /// Backend names in session-creation order
    pub fn session_backends(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.backend.name()).collect()
    }

    /// Lifecycle state of the session for a backend, if one is open
    pub fn session_state(&self, backend: &str) -> Option<SessionState> {
        self.slots
            .iter()
            .find(|s| s.backend.name() == backend)
            .map(|s| s.state)
    }

    /// Snapshot captured for an entity, if any
    pub fn snapshot_of(&self, entity: &EntityRef) -> Option<&Snapshot> {
        self.snapshots.snapshot(entity)
    }

    /// Number of snapshots captured so far
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    // ========================================================================
    // Session management
    // ========================================================================

    fn ensure_active(&self) -> StrataResult<()> {
        if self.status == Status::Active {
            Ok(())
        } else {
            Err(StrataError::TransactionNotActive {
                state: format!("{:?}", self.status),
            })
        }
    }

    /// Index of the session for a backend, opening it on first use
    fn session_index(&mut self, id: BackendId) -> StrataResult<usize> {
        if let Some(index) = self.slots.iter().position(|s| s.id == id) {
            return Ok(index);
        }
        let backend = Arc::clone(self.router.backend(id)?);
        let handle = match self.mode {
            TransactionMode::Read => SessionHandle::Read(backend.begin_read_session()?),
            TransactionMode::Write => SessionHandle::Write(backend.begin_write_session()?),
        };
        debug!(target: "strata::mux", backend = backend.name(), mode = ?self.mode, "Session opened");
        self.slots.push(SessionSlot {
            id,
            backend,
            handle,
            state: SessionState::Created,
        });
        Ok(self.slots.len() - 1)
    }

    /// Session for a backend, ready for work
    fn open_session(&mut self, id: BackendId) -> StrataResult<usize> {
        let index = self.session_index(id)?;
        let slot = &mut self.slots[index];
        slot.state.begin_work(slot.backend.name())?;
        Ok(index)
    }

    fn route_entity(&self, entity: &EntityRef) -> StrataResult<BackendId> {
        let entity_type = self.router.metadata().type_of(entity);
        self.router.route(&entity_type)
    }

    fn capture(&mut self, entity: &EntityRef) {
        if self.mode != TransactionMode::Write {
            return;
        }
        let strategies = &self.strategies;
        let metadata = self.router.metadata();
        self.snapshots
            .capture_with(entity, |record| strategies.capture(record, metadata.as_ref()));
    }

    /// Capture every entity of an iterable, keeping its hints
    fn hold_all(&mut self, iterable: EntityIterable) -> StrataResult<EntityIterable> {
        if self.mode != TransactionMode::Write {
            return Ok(iterable);
        }
        let hints = iterable.hints();
        let entities = iterable.collect_all()?;
        for entity in &entities {
            self.capture(entity);
        }
        Ok(EntityIterable::from_vec(entities).with_hints(hints))
    }

    /// Route a mutation to the entity's write session
    ///
    /// With `touch`, the entity's current state is captured first, so
    /// in-place edits (attributes, relation links) can be reversed even if
    /// the entity never came through a load.
    fn mutate<F>(
        &mut self,
        entity: &EntityRef,
        operation: &str,
        touch: bool,
        apply: F,
    ) -> StrataResult<BackendId>
    where
        F: FnOnce(&mut dyn WriteSession) -> StrataResult<()>,
    {
        self.ensure_active()?;
        let id = self.route_entity(entity)?;
        let index = self.open_session(id)?;
        if touch {
            self.capture(entity);
        }
        apply(self.slots[index].handle.writer(operation)?)?;
        self.snapshots.mark_dirty(id, entity);
        Ok(id)
    }

    fn finish_failed_commit(
        &mut self,
        failed: usize,
        error: StrataError,
        committed: &[(BackendId, Arc<dyn Backend>)],
    ) -> StrataError {
        let backend = self.slots[failed].backend.name().to_string();
        for slot in &mut self.slots[..=failed] {
            slot.state = SessionState::RolledBack;
        }
        self.status = Status::Failed;

        warn!(target: "strata::mux", backend = %backend, error = %error, committed = committed.len(), "Commit failed");

        let cause = if error.is_transaction_error() {
            error
        } else {
            StrataError::TransactionFailed {
                source: Box::new(error),
            }
        };

        let compensation_failures = if committed.is_empty() {
            Vec::new()
        } else {
            let report = compensate(committed, &self.snapshots);
            self.metrics.record_compensation(
                report.reversed.len(),
                report.skipped,
                report.failures.len(),
            );
            if report.is_clean() {
                info!(
                    target: "strata::mux",
                    reversed = ?report.reversed,
                    skipped = report.skipped,
                    "Committed backends reversed"
                );
            } else {
                warn!(
                    target: "strata::mux",
                    reversed = ?report.reversed,
                    skipped = report.skipped,
                    failed = report.failures.len(),
                    "Compensation left backends inconsistent"
                );
            }
            report.failures
        };
        self.metrics.record_abort();

        StrataError::BackendCommitFailure {
            backend,
            cause: Box::new(cause),
            compensation_failures,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Transaction for Coordinator {
    fn load(
        &mut self,
        projection: &EntityProjection,
        id: &EntityId,
    ) -> StrataResult<Option<EntityRef>> {
        self.ensure_active()?;
        let backend = self.router.route(&projection.entity_type)?;
        let index = self.open_session(backend)?;
        let loaded = with_session!(&mut self.slots[index].handle, s => s.load(projection, id))?;
        if let Some(entity) = &loaded {
            self.capture(entity);
        }
        Ok(loaded)
    }

    fn load_many(&mut self, projection: &EntityProjection) -> StrataResult<EntityIterable> {
        self.ensure_active()?;
        let backend = self.router.route(&projection.entity_type)?;
        let index = self.open_session(backend)?;
        let iterable = with_session!(&mut self.slots[index].handle, s => s.load_many(projection))?;
        self.hold_all(iterable)
    }

    fn create(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.ensure_active()?;
        let backend = self.route_entity(entity)?;
        let index = self.open_session(backend)?;
        self.slots[index].handle.writer("create")?.create(entity)?;
        self.snapshots.mark_created(backend, entity);
        Ok(())
    }

    fn save(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.mutate(entity, "save", false, |s| s.save(entity))?;
        Ok(())
    }

    fn delete(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.mutate(entity, "delete", false, |s| s.delete(entity))?;
        Ok(())
    }

    fn get_attribute(&mut self, entity: &EntityRef, name: &str) -> StrataResult<Option<Value>> {
        self.ensure_active()?;
        let backend = self.route_entity(entity)?;
        let index = self.open_session(backend)?;
        with_session!(&mut self.slots[index].handle, s => s.get_attribute(entity, name))
    }

    fn set_attribute(&mut self, entity: &EntityRef, name: &str, value: Value) -> StrataResult<()> {
        self.mutate(entity, "set_attribute", true, |s| {
            s.set_attribute(entity, name, value)
        })?;
        Ok(())
    }

    fn get_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<RelationValue> {
        self.ensure_active()?;
        let metadata = Arc::clone(self.router.metadata());
        let entity_type = metadata.type_of(entity);
        let source = self.router.route(&entity_type)?;
        let target_type = metadata.relation_target_type(&entity_type, &relation.name)?;
        let to_many = metadata.relation_is_to_many(&entity_type, &relation.name)?;
        let target = self.router.route(&target_type)?;

        self.open_session(source)?;
        let index = self.open_session(target)?;

        if source == target {
            let handle = &mut self.slots[index].handle;
            return if to_many {
                let iterable = with_session!(handle, s => s.get_to_many_relation(entity, relation, &target_type))?;
                Ok(RelationValue::ToMany(self.hold_all(iterable)?))
            } else {
                let single = with_session!(handle, s => s.get_to_one_relation(entity, relation, &target_type))?;
                if let Some(found) = &single {
                    self.capture(found);
                }
                Ok(RelationValue::ToOne(single))
            };
        }

        let bridge = with_session!(&self.slots[index].handle, s => s.bridge());
        let bridge = match bridge {
            Some(bridge) => bridge,
            None => {
                return Err(StrataError::UnsupportedCrossBackendRelation {
                    entity_type,
                    relation: relation.name.clone(),
                    source_backend: self.router.backend(source)?.name().to_string(),
                    target_backend: self.router.backend(target)?.name().to_string(),
                })
            }
        };

        debug!(
            target: "strata::mux",
            relation = %relation.name,
            entity_type = %entity_type,
            to_many,
            "Resolving relation through bridge"
        );
        if to_many {
            let iterable = bridge.bridge_load_many(self, entity, relation)?;
            Ok(RelationValue::ToMany(self.hold_all(iterable)?))
        } else {
            let single = bridge.bridge_load(self, entity, relation)?;
            if let Some(found) = &single {
                self.capture(found);
            }
            Ok(RelationValue::ToOne(single))
        }
    }

    fn update_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        target: Option<&EntityRef>,
    ) -> StrataResult<()> {
        self.mutate(entity, "update_to_one_relation", true, |s| {
            s.update_to_one_relation(entity, relation, target)
        })?;
        Ok(())
    }

    fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> StrataResult<()> {
        self.mutate(entity, "update_to_many_relation", true, |s| {
            s.update_to_many_relation(entity, relation, added, removed)
        })?;
        Ok(())
    }

    fn flush(&mut self) -> StrataResult<()> {
        self.ensure_active()?;
        for slot in &mut self.slots {
            with_session!(&mut slot.handle, s => s.flush())?;
            slot.state.transition(SessionState::Flushed, slot.backend.name())?;
        }
        Ok(())
    }

    fn pre_commit(&mut self) -> StrataResult<()> {
        self.ensure_active()?;
        for slot in &mut self.slots {
            with_session!(&mut slot.handle, s => s.pre_commit())?;
        }
        Ok(())
    }

    fn commit(&mut self) -> StrataResult<()> {
        self.ensure_active()?;
        if let Err(error) = self.flush() {
            for slot in &mut self.slots {
                slot.state = SessionState::RolledBack;
            }
            self.status = Status::Failed;
            self.metrics.record_abort();
            warn!(target: "strata::mux", error = %error, "Flush before commit failed");
            return Err(error);
        }

        let mut committed: SmallVec<[(BackendId, Arc<dyn Backend>); 4]> = SmallVec::new();
        for index in (0..self.slots.len()).rev() {
            let slot = &mut self.slots[index];
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                with_session!(&mut slot.handle, s => s.commit())
            }));
            let error = match outcome {
                Ok(Ok(())) => {
                    slot.state = SessionState::Committed;
                    debug!(target: "strata::mux", backend = slot.backend.name(), "Session committed");
                    if self.policy.applies_to(slot.backend.name()) {
                        committed.push((slot.id, Arc::clone(&slot.backend)));
                    }
                    continue;
                }
                Ok(Err(error)) => error,
                Err(payload) => StrataError::internal(format!(
                    "commit on '{}' panicked: {}",
                    slot.backend.name(),
                    panic_message(payload.as_ref())
                )),
            };
            return Err(self.finish_failed_commit(index, error, &committed));
        }

        self.status = Status::Committed;
        self.metrics.record_commit();
        info!(target: "strata::mux", sessions = self.slots.len(), "Transaction committed");
        Ok(())
    }

    fn cancel(&mut self) {
        for slot in &mut self.slots {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                with_session!(&mut slot.handle, s => s.cancel())
            }));
            if outcome.is_err() {
                warn!(target: "strata::mux", backend = slot.backend.name(), "Cancel panicked");
            }
        }
    }

    fn close(&mut self) -> StrataResult<()> {
        if self.status == Status::Closed {
            return Ok(());
        }

        let mut failures = Vec::new();
        for slot in self.slots.iter_mut().rev() {
            let name = slot.backend.name().to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                with_session!(&mut slot.handle, s => s.close())
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => failures.push((name, error)),
                Err(payload) => failures.push((
                    name,
                    StrataError::internal(format!(
                        "close panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                )),
            }
            slot.state = SessionState::Closed;
        }

        if self.status == Status::Active {
            self.metrics.record_release();
        }
        self.status = Status::Closed;
        self.slots.clear();
        self.snapshots.clear();

        if failures.is_empty() {
            Ok(())
        } else {
            for (backend, error) in &failures {
                warn!(target: "strata::mux", backend = %backend, error = %error, "Session close failed");
            }
            Err(StrataError::CloseFailure { failures })
        }
    }

    fn property(&mut self, name: &str) -> StrataResult<Option<Value>> {
        if self.status == Status::Closed {
            return Err(StrataError::TransactionNotActive {
                state: format!("{:?}", self.status),
            });
        }
        let (prefix, key) = match name.split_once('.') {
            Some(parts) => parts,
            None => return Ok(None),
        };
        let backend = match self.router.find(prefix) {
            Some(backend) => backend,
            None => return Ok(None),
        };
        let index = self.session_index(backend)?;
        Ok(with_session!(&self.slots[index].handle, s => s.property(key)))
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.status != Status::Closed {
            if let Err(error) = self.close() {
                warn!(target: "strata::mux", error = %error, "Close on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("sessions", &self.session_backends())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}
