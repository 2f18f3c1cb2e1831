//! Shared fixtures for coordinator integration tests.
//!
//! Import via `mod common;`.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Once};
use strata_core::{
    Backend, Bridge, Cardinality, EntityDictionary, EntityId, EntityIterable, EntityMetadata,
    EntityProjection, EntityRef, EntityType, FilterExpression, InMemoryHints, ReadSession, Record,
    Relationship, StrataError, StrataResult, Transaction, Value, WriteSession,
};
use strata_engine::{InMemoryBackend, MultiplexManager};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Orders own Order, shipping owns Shipment, billing owns Invoice.
///
/// - `Order.shipments` -> many Shipment (cross-backend)
/// - `Shipment.order` -> one Order (cross-backend)
/// - `Order.invoice` -> one Invoice (cross-backend, never bridged)
/// - `Order.lines` -> many OrderLine (same backend)
pub fn dictionary() -> Arc<dyn EntityMetadata> {
    Arc::new(
        EntityDictionary::builder()
            .entity("Order")
            .entity("OrderLine")
            .entity("Shipment")
            .entity("Invoice")
            .relation("Order", "shipments", "Shipment", Cardinality::ToMany)
            .relation("Order", "invoice", "Invoice", Cardinality::ToOne)
            .relation("Order", "lines", "OrderLine", Cardinality::ToMany)
            .relation("Shipment", "order", "Order", Cardinality::ToOne)
            .build()
            .expect("dictionary"),
    )
}

// ============================================================================
// Scripted backend
// ============================================================================

/// Ordered log of calls, shared by every backend of a test.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// New empty call log.
pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Calls in the log matching an operation, e.g. `"commit"`.
pub fn calls_of(log: &CallLog, operation: &str) -> Vec<String> {
    let suffix = format!(":{}", operation);
    log.lock()
        .iter()
        .filter(|c| c.ends_with(&suffix))
        .cloned()
        .collect()
}

#[derive(Default)]
struct Faults {
    commits: usize,
    fail_commit: BTreeMap<usize, StrataError>,
    panic_commit: bool,
    fail_close: bool,
    fail_begin: bool,
    load_many_hints: Option<InMemoryHints>,
    pulled: usize,
}

/// In-memory backend that records every session call and can be told to fail.
///
/// Commits are numbered per backend from 1; `fail_commit(n, ..)` fails the
/// n-th commit without applying it. A compensation pass is a commit too.
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<InMemoryBackend>,
    log: CallLog,
    faults: Arc<Mutex<Faults>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, types: &[&str], log: &CallLog) -> Self {
        Self::wrap(InMemoryBackend::new(name, types.iter().copied()), log)
    }

    pub fn wrap(inner: InMemoryBackend, log: &CallLog) -> Self {
        Self {
            inner: Arc::new(inner),
            log: Arc::clone(log),
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    pub fn shared(&self) -> Arc<dyn Backend> {
        Arc::new(self.clone())
    }

    pub fn store(&self) -> &InMemoryBackend {
        &self.inner
    }

    pub fn insert(&self, record: Record) -> EntityId {
        self.inner.insert(record)
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Option<Record> {
        self.inner.get(&EntityType::from(entity_type), &EntityId::from(id))
    }

    pub fn count(&self, entity_type: &str) -> usize {
        self.inner.count(&EntityType::from(entity_type))
    }

    /// Fail the n-th commit on this backend
    pub fn fail_commit(&self, n: usize, error: StrataError) {
        self.faults.lock().fail_commit.insert(n, error);
    }

    pub fn panic_on_commit(&self) {
        self.faults.lock().panic_commit = true;
    }

    pub fn fail_close(&self) {
        self.faults.lock().fail_close = true;
    }

    pub fn fail_begin(&self) {
        self.faults.lock().fail_begin = true;
    }

    pub fn commits(&self) -> usize {
        self.faults.lock().commits
    }

    /// Tag every `load_many` result with these in-memory hints
    pub fn hint_load_many(&self, hints: InMemoryHints) {
        self.faults.lock().load_many_hints = Some(hints);
    }

    /// Entities pulled so far from `load_many` cursors
    pub fn pulled(&self) -> usize {
        self.faults.lock().pulled
    }

    fn begin(&self, inner: Box<dyn WriteSession>) -> ScriptedSession {
        ScriptedSession {
            name: self.inner.name().to_string(),
            inner,
            log: Arc::clone(&self.log),
            faults: Arc::clone(&self.faults),
        }
    }
}

impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn owned_types(&self) -> Vec<EntityType> {
        self.inner.owned_types()
    }

    fn begin_read_session(&self) -> StrataResult<Box<dyn ReadSession>> {
        self.log.lock().push(format!("{}:begin_read", self.name()));
        if self.faults.lock().fail_begin {
            return Err(StrataError::storage("backend unavailable"));
        }
        Ok(Box::new(self.begin(self.inner.begin_write_session()?)))
    }

    fn begin_write_session(&self) -> StrataResult<Box<dyn WriteSession>> {
        self.log.lock().push(format!("{}:begin", self.name()));
        if self.faults.lock().fail_begin {
            return Err(StrataError::storage("backend unavailable"));
        }
        Ok(Box::new(self.begin(self.inner.begin_write_session()?)))
    }
}

struct ScriptedSession {
    name: String,
    inner: Box<dyn WriteSession>,
    log: CallLog,
    faults: Arc<Mutex<Faults>>,
}

impl ScriptedSession {
    fn record(&self, operation: &str) {
        self.log.lock().push(format!("{}:{}", self.name, operation));
    }
}

impl ReadSession for ScriptedSession {
    fn load(&mut self, projection: &EntityProjection, id: &EntityId) -> StrataResult<Option<EntityRef>> {
        self.record("load");
        self.inner.load(projection, id)
    }

    fn load_many(&mut self, projection: &EntityProjection) -> StrataResult<EntityIterable> {
        self.record("load_many");
        let iterable = self.inner.load_many(projection)?;
        let hints = self
            .faults
            .lock()
            .load_many_hints
            .unwrap_or_else(|| iterable.hints());
        let faults = Arc::clone(&self.faults);
        let counted = iterable.inspect(move |_| faults.lock().pulled += 1);
        Ok(EntityIterable::from_cursor(counted).with_hints(hints))
    }

    fn get_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<Option<EntityRef>> {
        self.record("relation");
        self.inner.get_to_one_relation(entity, relation, target_type)
    }

    fn get_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &Relationship,
        target_type: &EntityType,
    ) -> StrataResult<EntityIterable> {
        self.record("relation");
        self.inner.get_to_many_relation(entity, relation, target_type)
    }

    fn flush(&mut self) -> StrataResult<()> {
        self.record("flush");
        self.inner.flush()
    }

    fn pre_commit(&mut self) -> StrataResult<()> {
        self.record("pre_commit");
        self.inner.pre_commit()
    }

    fn commit(&mut self) -> StrataResult<()> {
        self.record("commit");
        let (n, panic, failure) = {
            let mut faults = self.faults.lock();
            faults.commits += 1;
            let n = faults.commits;
            (n, faults.panic_commit, faults.fail_commit.remove(&n))
        };
        if panic {
            panic!("{} commit #{} exploded", self.name, n);
        }
        match failure {
            Some(error) => Err(error),
            None => self.inner.commit(),
        }
    }

    fn cancel(&mut self) {
        self.record("cancel");
        self.inner.cancel();
    }

    fn close(&mut self) -> StrataResult<()> {
        self.record("close");
        let closed = self.inner.close();
        if self.faults.lock().fail_close {
            return Err(StrataError::storage(format!("{} connection reset", self.name)));
        }
        closed
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.inner.property(name)
    }

    fn bridge(&self) -> Option<Arc<dyn Bridge>> {
        self.inner.bridge()
    }
}

impl WriteSession for ScriptedSession {
    fn create(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.record("create");
        self.inner.create(entity)
    }

    fn save(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.record("save");
        self.inner.save(entity)
    }

    fn delete(&mut self, entity: &EntityRef) -> StrataResult<()> {
        self.record("delete");
        self.inner.delete(entity)
    }

    fn update_to_one_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        target: Option<&EntityRef>,
    ) -> StrataResult<()> {
        self.record("update_relation");
        self.inner.update_to_one_relation(entity, relation, target)
    }

    fn update_to_many_relation(
        &mut self,
        entity: &EntityRef,
        relation: &str,
        added: &[EntityRef],
        removed: &[EntityRef],
    ) -> StrataResult<()> {
        self.record("update_relation");
        self.inner
            .update_to_many_relation(entity, relation, added, removed)
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// Resolves relations whose target stores a foreign key to the source.
///
/// `Order.shipments` becomes `load_many(Shipment where order_id = order.id)`
/// through the coordinator, with the caller's filter, sorting and
/// pagination applied on top. `Shipment.order` reads the shipment's
/// `order_id` and loads the order.
#[derive(Default)]
pub struct ForeignKeyBridge {
    seen: Mutex<Vec<Relationship>>,
}

impl ForeignKeyBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Relationship descriptors received, in call order
    pub fn seen(&self) -> Vec<Relationship> {
        self.seen.lock().clone()
    }
}

impl Bridge for ForeignKeyBridge {
    fn bridge_load(
        &self,
        tx: &mut dyn Transaction,
        source: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<Option<EntityRef>> {
        self.seen.lock().push(relation.clone());
        let order_id = match source.get("order_id") {
            Some(Value::String(id)) => EntityId::from(id),
            _ => return Ok(None),
        };
        let mut projection = EntityProjection::of("Order");
        if let Some(filter) = &relation.filter {
            projection = projection.with_filter(filter.clone());
        }
        tx.load(&projection, &order_id)
    }

    fn bridge_load_many(
        &self,
        tx: &mut dyn Transaction,
        source: &EntityRef,
        relation: &Relationship,
    ) -> StrataResult<EntityIterable> {
        self.seen.lock().push(relation.clone());
        let id = source
            .id()
            .ok_or_else(|| StrataError::invalid_input("source entity has no id"))?;
        let by_owner = FilterExpression::equals("order_id", id.as_str());
        let filter = match &relation.filter {
            Some(extra) => by_owner.and(extra.clone()),
            None => by_owner,
        };
        let mut projection = EntityProjection::of("Shipment")
            .with_filter(filter)
            .with_sorting(relation.sorting.clone());
        if let Some(window) = relation.pagination {
            projection = projection.with_pagination(window);
        }
        tx.load_many(&projection)
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// Two-backend setup used by most tests: orders first, shipping second.
pub struct Shop {
    pub log: CallLog,
    pub orders: ScriptedBackend,
    pub shipping: ScriptedBackend,
    pub bridge: Arc<ForeignKeyBridge>,
}

impl Shop {
    pub fn new() -> Self {
        init_tracing();
        let log = call_log();
        let bridge = ForeignKeyBridge::new();
        let orders = ScriptedBackend::wrap(
            InMemoryBackend::new("orders", ["Order", "OrderLine"])
                .with_bridge(bridge.clone())
                .with_property("region", "eu-west"),
            &log,
        );
        let shipping = ScriptedBackend::wrap(
            InMemoryBackend::new("shipping", ["Shipment"]).with_bridge(bridge.clone()),
            &log,
        );
        Self {
            log,
            orders,
            shipping,
            bridge,
        }
    }

    pub fn manager(&self) -> MultiplexManager {
        MultiplexManager::builder(dictionary())
            .backend(self.orders.shared())
            .backend(self.shipping.shared())
            .build()
            .expect("manager")
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

/// Order record with an id and status
pub fn order(id: &str, status: &str) -> Record {
    Record::new("Order").with_id(id).with_attribute("status", status)
}

/// Shipment record pointing at an order
pub fn shipment(id: &str, order_id: &str, carrier: &str) -> Record {
    Record::new("Shipment")
        .with_id(id)
        .with_attribute("order_id", order_id)
        .with_attribute("carrier", carrier)
}
