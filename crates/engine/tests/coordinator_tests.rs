//! Coordinator Integration Tests
//!
//! Validates the multiplex transaction lifecycle end to end:
//! - Lazy, one-per-backend sessions
//! - Commit ordering and compensation after partial commits
//! - Read-only transactions
//! - Close aggregation, cancel and drop
//! - Cross-backend relations through bridges
//! - Transaction properties

mod common;

use common::*;
use proptest::prelude::*;
use strata_concurrency::{SessionState, Snapshot};
use strata_core::{
    EntityId, EntityProjection, EntityRef, FilterExpression, InMemoryHints, Pagination, Record,
    Relationship, Sorting, StrataError, Transaction, Value,
};
use strata_engine::{CompensationPolicy, InMemoryBackend, MultiplexManager, TransactionMode};

fn by_id(entity_type: &str, id: &str) -> (EntityProjection, EntityId) {
    (EntityProjection::of(entity_type), EntityId::from(id))
}

fn load(tx: &mut impl Transaction, entity_type: &str, id: &str) -> EntityRef {
    let (projection, id) = by_id(entity_type, id);
    tx.load(&projection, &id).unwrap().expect("entity exists")
}

fn status(record: &Record) -> Option<&str> {
    record.attribute("status").and_then(|v| v.as_str())
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_sessions_open_lazily_one_per_backend() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(Record::new("OrderLine").with_id("10"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    assert_eq!(tx.session_count(), 0);
    assert!(shop.calls().is_empty());

    load(&mut tx, "Order", "1");
    load(&mut tx, "OrderLine", "10");
    load(&mut tx, "Order", "1");

    assert_eq!(tx.session_count(), 1);
    assert_eq!(calls_of(&shop.log, "begin"), vec!["orders:begin"]);
    tx.close().unwrap();
}

#[test]
fn test_flush_and_pre_commit_follow_creation_order() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    assert_eq!(tx.session_backends(), vec!["shipping", "orders"]);

    tx.flush().unwrap();
    tx.pre_commit().unwrap();
    assert_eq!(calls_of(&shop.log, "flush"), vec!["shipping:flush", "orders:flush"]);
    assert_eq!(
        calls_of(&shop.log, "pre_commit"),
        vec!["shipping:pre_commit", "orders:pre_commit"]
    );
    assert_eq!(tx.session_state("orders"), Some(SessionState::Flushed));
    tx.close().unwrap();
}

#[test]
fn test_begin_failure_propagates() {
    let shop = Shop::new();
    shop.orders.fail_begin();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let (projection, id) = by_id("Order", "1");
    let err = tx.load(&projection, &id).unwrap_err();
    assert!(matches!(err, StrataError::Storage { .. }));
    assert_eq!(tx.session_count(), 0);
}

#[test]
fn test_unknown_entity_type_opens_nothing() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let err = tx
        .load_many(&EntityProjection::of("Widget"))
        .unwrap_err();
    assert!(matches!(err, StrataError::UnknownEntityType { .. }));
    assert_eq!(tx.session_count(), 0);
}

// ============================================================================
// Commit ordering
// ============================================================================

#[test]
fn test_commit_runs_in_reverse_creation_order() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    tx.commit().unwrap();

    assert_eq!(calls_of(&shop.log, "flush"), vec!["orders:flush", "shipping:flush"]);
    assert_eq!(
        calls_of(&shop.log, "commit"),
        vec!["shipping:commit", "orders:commit"]
    );
    assert_eq!(tx.session_state("orders"), Some(SessionState::Committed));
    assert_eq!(tx.session_state("shipping"), Some(SessionState::Committed));
    tx.close().unwrap();

    assert_eq!(shop.orders.count("Order"), 1);
    assert_eq!(shop.shipping.count("Shipment"), 1);
}

proptest! {
    #[test]
    fn prop_commit_order_is_reverse_of_first_touch(
        touch in Just(vec![0usize, 1, 2]).prop_shuffle()
    ) {
        let log = call_log();
        let backends = [
            ScriptedBackend::new("orders", &["Order"], &log),
            ScriptedBackend::new("shipping", &["Shipment"], &log),
            ScriptedBackend::new("billing", &["Invoice"], &log),
        ];
        let names = ["orders", "shipping", "billing"];
        let types = ["Order", "Shipment", "Invoice"];
        let manager = MultiplexManager::builder(dictionary())
            .backend(backends[0].shared())
            .backend(backends[1].shared())
            .backend(backends[2].shared())
            .build()
            .unwrap();

        let mut tx = manager.begin_transaction();
        for &i in &touch {
            tx.load_many(&EntityProjection::of(types[i])).unwrap();
        }
        tx.commit().unwrap();
        tx.close().unwrap();

        let expected: Vec<String> = touch
            .iter()
            .rev()
            .map(|&i| format!("{}:commit", names[i]))
            .collect();
        prop_assert_eq!(calls_of(&log, "commit"), expected);
    }
}

#[test]
fn test_operations_after_commit_are_rejected() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.commit().unwrap();

    let (projection, id) = by_id("Order", "1");
    assert!(matches!(
        tx.load(&projection, &id).unwrap_err(),
        StrataError::TransactionNotActive { .. }
    ));
    assert!(matches!(
        tx.commit().unwrap_err(),
        StrataError::TransactionNotActive { .. }
    ));
    tx.close().unwrap();
}

// ============================================================================
// Compensation
// ============================================================================

#[test]
fn test_created_entity_deleted_when_earlier_backend_fails() {
    let shop = Shop::new();
    shop.orders.fail_commit(1, StrataError::storage("disk full"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();

    let err = tx.commit().unwrap_err();
    match &err {
        StrataError::BackendCommitFailure {
            backend,
            compensation_failures,
            ..
        } => {
            assert_eq!(backend, "orders");
            assert!(compensation_failures.is_empty());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(matches!(err.root_cause(), StrataError::Storage { .. }));
    tx.close().unwrap();

    // Shipping committed, then was reversed by a second commit
    assert_eq!(shop.shipping.commits(), 2);
    assert_eq!(shop.shipping.count("Shipment"), 0);
    assert_eq!(shop.orders.count("Order"), 0);

    let mut check = manager.begin_read_transaction();
    let left = check
        .load_many(&EntityProjection::of("Shipment"))
        .unwrap()
        .collect_all()
        .unwrap();
    assert!(left.is_empty());
    check.close().unwrap();
}

#[test]
fn test_updated_entity_restored_when_later_commit_fails() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.shipping.fail_commit(1, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    // Shipping first, so orders commits first
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    let order = load(&mut tx, "Order", "1");
    tx.set_attribute(&order, "status", Value::from("SHIPPED")).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        StrataError::BackendCommitFailure { ref backend, .. } if backend == "shipping"
    ));
    assert_eq!(tx.session_state("orders"), Some(SessionState::Committed));
    assert_eq!(tx.session_state("shipping"), Some(SessionState::RolledBack));
    tx.close().unwrap();

    let restored = shop.orders.get("Order", "1").unwrap();
    assert_eq!(status(&restored), Some("PENDING"));
    assert_eq!(shop.shipping.count("Shipment"), 0);
}

#[test]
fn test_every_committed_backend_is_compensated() {
    let log = call_log();
    let orders = ScriptedBackend::new("orders", &["Order"], &log);
    let shipping = ScriptedBackend::new("shipping", &["Shipment"], &log);
    let billing = ScriptedBackend::new("billing", &["Invoice"], &log);
    billing.insert(Record::new("Invoice").with_id("i1").with_attribute("total", 100i64));
    orders.fail_commit(1, StrataError::aborted("write conflict"));

    let manager = MultiplexManager::builder(dictionary())
        .backend(orders.shared())
        .backend(shipping.shared())
        .backend(billing.shared())
        .build()
        .unwrap();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    let invoice = load(&mut tx, "Invoice", "i1");
    tx.set_attribute(&invoice, "total", Value::from(250i64)).unwrap();

    let err = tx.commit().unwrap_err();
    match &err {
        StrataError::BackendCommitFailure { backend, cause, .. } => {
            assert_eq!(backend, "orders");
            // Recognized transaction errors are not wrapped
            assert!(matches!(**cause, StrataError::TransactionAborted { .. }));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    tx.close().unwrap();

    assert_eq!(
        calls_of(&log, "commit"),
        vec![
            "billing:commit",
            "shipping:commit",
            "orders:commit",
            // compensation, in commit order
            "billing:commit",
            "shipping:commit",
        ]
    );
    assert_eq!(orders.count("Order"), 0);
    assert_eq!(shipping.count("Shipment"), 0);
    let total = billing.get("Invoice", "i1").unwrap();
    assert_eq!(total.attribute("total"), Some(&Value::Int(100)));
}

#[test]
fn test_single_backend_failure_runs_no_compensation() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.fail_commit(1, StrataError::storage("disk full"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let order = load(&mut tx, "Order", "1");
    tx.set_attribute(&order, "status", Value::from("SHIPPED")).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(err.compensation_failures().is_empty());
    tx.close().unwrap();

    assert_eq!(calls_of(&shop.log, "begin"), vec!["orders:begin"]);
    assert_eq!(shop.orders.commits(), 1);
    assert_eq!(manager.metrics().compensations_run, 0);
    assert_eq!(status(&shop.orders.get("Order", "1").unwrap()), Some("PENDING"));
}

#[test]
fn test_non_transaction_error_is_wrapped() {
    let shop = Shop::new();
    shop.orders.fail_commit(1, StrataError::storage("disk full"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();

    match tx.commit().unwrap_err() {
        StrataError::BackendCommitFailure { cause, .. } => match *cause {
            StrataError::TransactionFailed { source } => {
                assert!(matches!(*source, StrataError::Storage { .. }));
            }
            other => panic!("cause should be wrapped: {:?}", other),
        },
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_commit_panic_is_contained_and_compensated() {
    let shop = Shop::new();
    shop.orders.panic_on_commit();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        StrataError::BackendCommitFailure { ref backend, .. } if backend == "orders"
    ));
    assert!(matches!(err.root_cause(), StrataError::Internal { .. }));
    tx.close().unwrap();

    assert_eq!(shop.shipping.count("Shipment"), 0);
}

#[test]
fn test_compensation_policy_excludes_backend() {
    let shop = Shop::new();
    shop.orders.fail_commit(1, StrataError::storage("disk full"));
    let manager = MultiplexManager::builder(dictionary())
        .backend(shop.orders.shared())
        .backend(shop.shipping.shared())
        .compensation(CompensationPolicy::all().with_backend("shipping", false))
        .build()
        .unwrap();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    tx.commit().unwrap_err();
    tx.close().unwrap();

    // Shipping committed and was left alone
    assert_eq!(shop.shipping.commits(), 1);
    assert_eq!(shop.shipping.count("Shipment"), 1);
}

#[test]
fn test_compensation_failure_is_reported() {
    let shop = Shop::new();
    shop.orders.fail_commit(1, StrataError::storage("disk full"));
    shop.shipping.fail_commit(2, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();

    let err = tx.commit().unwrap_err();
    // The original failure is still what surfaces
    assert!(matches!(
        err,
        StrataError::BackendCommitFailure { ref backend, .. } if backend == "orders"
    ));
    let failures = err.compensation_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].backend, "shipping");
    tx.close().unwrap();

    assert_eq!(shop.shipping.count("Shipment"), 1);
    let metrics = manager.metrics();
    assert_eq!(metrics.compensations_run, 1);
    assert_eq!(metrics.compensation_failures, 1);
}

#[test]
fn test_entity_saved_without_load_is_skipped() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.shipping.fail_commit(1, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    let detached = EntityRef::new(order("1", "SHIPPED"));
    tx.save(&detached).unwrap();
    assert!(tx.snapshot_of(&detached).is_none());

    tx.commit().unwrap_err();
    tx.close().unwrap();

    // No prior state was known, so the write stands
    assert_eq!(status(&shop.orders.get("Order", "1").unwrap()), Some("SHIPPED"));
}

#[test]
fn test_entity_from_load_many_is_restored_after_failed_commit() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(order("2", "PENDING"));
    shop.shipping.fail_commit(1, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    let orders = tx
        .load_many(&EntityProjection::of("Order").with_sorting(Sorting::ascending("id")))
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(orders.len(), 2);

    // Edited in place, then saved: only the capture from load_many knows the prior state
    let first = &orders[0];
    first.set("status", "SHIPPED");
    tx.save(first).unwrap();

    tx.commit().unwrap_err();
    tx.close().unwrap();

    assert_eq!(status(&shop.orders.get("Order", "1").unwrap()), Some("PENDING"));
    assert_eq!(status(&shop.orders.get("Order", "2").unwrap()), Some("PENDING"));
    let metrics = manager.metrics();
    assert_eq!(metrics.backends_reversed, 1);
    assert_eq!(metrics.entities_skipped, 0);
}

#[test]
fn test_compensation_counts_skipped_entities() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.shipping.fail_commit(1, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    tx.save(&EntityRef::new(order("1", "SHIPPED"))).unwrap();
    tx.commit().unwrap_err();
    tx.close().unwrap();

    let metrics = manager.metrics();
    assert_eq!(metrics.compensations_run, 1);
    assert_eq!(metrics.backends_reversed, 1);
    assert_eq!(metrics.entities_skipped, 1);
    assert_eq!(metrics.compensation_failures, 0);
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_first_load_wins_snapshot() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let first = load(&mut tx, "Order", "1");
    first.set("status", "PACKED");
    let second = load(&mut tx, "Order", "1");
    assert!(first.ptr_eq(&second));

    assert_eq!(tx.snapshot_count(), 1);
    match tx.snapshot_of(&second) {
        Some(Snapshot::Prior(record)) => assert_eq!(status(record), Some("PENDING")),
        other => panic!("expected prior snapshot, got {:?}", other),
    }
    tx.close().unwrap();
}

#[test]
fn test_created_entity_snapshot_is_marker() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let created = EntityRef::new(order("7", "NEW"));
    tx.create(&created).unwrap();
    assert!(matches!(tx.snapshot_of(&created), Some(Snapshot::NewlyCreated)));
    tx.close().unwrap();
}

#[test]
fn test_write_load_many_captures_and_keeps_hints() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(order("2", "PENDING"));
    let hints = InMemoryHints {
        filter: true,
        sort: false,
        paginate: true,
    };
    shop.orders.hint_load_many(hints);
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let iterable = tx.load_many(&EntityProjection::of("Order")).unwrap();
    // Materialized before returning, so every entity is already captured
    assert_eq!(shop.orders.pulled(), 2);
    assert_eq!(tx.snapshot_count(), 2);
    assert_eq!(iterable.hints(), hints);

    let orders = iterable.collect_all().unwrap();
    for entity in &orders {
        let prior = tx.snapshot_of(entity).and_then(|s| s.prior()).unwrap();
        assert_eq!(status(prior), Some("PENDING"));
    }
    tx.close().unwrap();
}

#[test]
fn test_read_load_many_stays_lazy() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(order("2", "PENDING"));
    shop.orders.hint_load_many(InMemoryHints::all());
    let manager = shop.manager();

    let mut tx = manager.begin_read_transaction();
    let mut iterable = tx.load_many(&EntityProjection::of("Order")).unwrap();
    assert_eq!(shop.orders.pulled(), 0);
    assert_eq!(iterable.hints(), InMemoryHints::all());

    iterable.next().unwrap().unwrap();
    assert_eq!(shop.orders.pulled(), 1);
    assert_eq!(iterable.count(), 1);
    assert_eq!(shop.orders.pulled(), 2);
    assert_eq!(tx.snapshot_count(), 0);
    tx.close().unwrap();
}

// ============================================================================
// Read-only transactions
// ============================================================================

#[test]
fn test_read_transaction_rejects_mutation() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    let manager = shop.manager();

    let mut tx = manager.begin_read_transaction();
    assert_eq!(tx.mode(), TransactionMode::Read);

    let fresh = EntityRef::new(order("2", "NEW"));
    assert!(matches!(
        tx.create(&fresh).unwrap_err(),
        StrataError::UnsupportedOperation { .. }
    ));
    // The read session itself refused the create and stays usable
    assert_eq!(tx.session_count(), 1);
    assert_eq!(tx.session_state("orders"), Some(SessionState::Open));

    let existing = load(&mut tx, "Order", "1");
    for err in [
        tx.save(&existing).unwrap_err(),
        tx.delete(&existing).unwrap_err(),
        tx.set_attribute(&existing, "status", Value::from("X")).unwrap_err(),
    ] {
        assert!(matches!(err, StrataError::UnsupportedOperation { .. }));
    }

    assert_eq!(tx.snapshot_count(), 0);
    assert!(calls_of(&shop.log, "save").is_empty());
    assert!(calls_of(&shop.log, "delete").is_empty());
    assert_eq!(calls_of(&shop.log, "begin_read"), vec!["orders:begin_read"]);
    tx.close().unwrap();
    assert_eq!(status(&shop.orders.get("Order", "1").unwrap()), Some("PENDING"));
}

// ============================================================================
// Close, cancel, drop
// ============================================================================

#[test]
fn test_close_aggregates_failures_in_reverse_order() {
    let shop = Shop::new();
    shop.orders.fail_close();
    shop.shipping.fail_close();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.load_many(&EntityProjection::of("Order")).unwrap();
    tx.load_many(&EntityProjection::of("Shipment")).unwrap();

    match tx.close().unwrap_err() {
        StrataError::CloseFailure { failures } => {
            let names: Vec<&str> = failures.iter().map(|(b, _)| b.as_str()).collect();
            assert_eq!(names, vec!["shipping", "orders"]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        calls_of(&shop.log, "close"),
        vec!["shipping:close", "orders:close"]
    );
    assert_eq!(tx.session_count(), 0);

    // Closing again is a no-op
    tx.close().unwrap();
    drop(tx);
    assert_eq!(calls_of(&shop.log, "close").len(), 2);
}

#[test]
fn test_cancel_reaches_every_session() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    tx.cancel();
    assert_eq!(
        calls_of(&shop.log, "cancel"),
        vec!["orders:cancel", "shipping:cancel"]
    );

    // Cancelled sessions refuse to commit
    let err = tx.commit().unwrap_err();
    assert!(err.compensation_failures().is_empty());
    tx.close().unwrap();
    assert_eq!(shop.orders.count("Order"), 0);
    assert_eq!(shop.shipping.count("Shipment"), 0);
}

#[test]
fn test_drop_closes_open_sessions() {
    let shop = Shop::new();
    let manager = shop.manager();
    {
        let mut tx = manager.begin_transaction();
        tx.load_many(&EntityProjection::of("Order")).unwrap();
    }
    assert_eq!(calls_of(&shop.log, "close"), vec!["orders:close"]);
    assert_eq!(manager.metrics().active_count, 0);
}

// ============================================================================
// Relations
// ============================================================================

fn seed_shipments(shop: &Shop) {
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(order("2", "PENDING"));
    shop.shipping.insert(shipment("s1", "1", "DHL"));
    shop.shipping.insert(shipment("s2", "1", "UPS"));
    shop.shipping.insert(shipment("s3", "2", "DHL"));
}

fn ids(entities: &[EntityRef]) -> Vec<String> {
    entities
        .iter()
        .map(|e| e.id().map(|id| id.as_str().to_string()).unwrap_or_default())
        .collect()
}

#[test]
fn test_cross_backend_to_many_goes_through_bridge() {
    let shop = Shop::new();
    seed_shipments(&shop);
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let order = load(&mut tx, "Order", "1");
    shop.clear_log();

    let shipments = tx
        .get_relation(&order, &Relationship::named("shipments"))
        .unwrap()
        .into_vec()
        .unwrap();

    let mut found = ids(&shipments);
    found.sort();
    assert_eq!(found, vec!["s1", "s2"]);
    assert_eq!(shop.bridge.seen().len(), 1);
    assert!(calls_of(&shop.log, "relation").is_empty());
    assert_eq!(calls_of(&shop.log, "load_many"), vec!["shipping:load_many"]);
    // Bridged entities are snapshotted like any other load
    assert_eq!(tx.snapshot_count(), 3);
    tx.close().unwrap();
}

#[test]
fn test_bridge_receives_filter_sorting_and_pagination() {
    let shop = Shop::new();
    seed_shipments(&shop);
    shop.shipping.insert(shipment("s4", "1", "DHL"));
    let manager = shop.manager();

    let relation = Relationship::named("shipments")
        .with_filter(FilterExpression::equals("carrier", "DHL"))
        .with_sorting(Sorting::descending("id"))
        .with_pagination(Pagination::new(0, 1));

    let mut tx = manager.begin_read_transaction();
    let order = load(&mut tx, "Order", "1");
    let shipments = tx.get_relation(&order, &relation).unwrap().into_vec().unwrap();

    assert_eq!(ids(&shipments), vec!["s4"]);
    assert_eq!(shop.bridge.seen(), vec![relation]);
    tx.close().unwrap();
}

#[test]
fn test_cross_backend_to_one_goes_through_bridge() {
    let shop = Shop::new();
    seed_shipments(&shop);
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let shipment = load(&mut tx, "Shipment", "s3");
    let owner = tx
        .get_relation(&shipment, &Relationship::named("order"))
        .unwrap()
        .into_single()
        .expect("order");
    assert_eq!(owner.id(), Some(EntityId::from("2")));
    assert_eq!(tx.session_backends(), vec!["shipping", "orders"]);
    tx.close().unwrap();
}

#[test]
fn test_same_backend_relation_uses_session() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING").with_to_many("lines", ["10", "11"]));
    shop.orders.insert(Record::new("OrderLine").with_id("10"));
    shop.orders.insert(Record::new("OrderLine").with_id("11"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let order = load(&mut tx, "Order", "1");
    let lines = tx
        .get_relation(&order, &Relationship::named("lines"))
        .unwrap()
        .into_vec()
        .unwrap();

    assert_eq!(ids(&lines), vec!["10", "11"]);
    assert_eq!(calls_of(&shop.log, "relation"), vec!["orders:relation"]);
    assert!(shop.bridge.seen().is_empty());
    assert_eq!(tx.session_count(), 1);
    tx.close().unwrap();
}

#[test]
fn test_cross_backend_relation_without_bridge_fails() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    let billing = ScriptedBackend::wrap(InMemoryBackend::new("billing", ["Invoice"]), &shop.log);
    let manager = MultiplexManager::builder(dictionary())
        .backend(shop.orders.shared())
        .backend(shop.shipping.shared())
        .backend(billing.shared())
        .build()
        .unwrap();

    let mut tx = manager.begin_transaction();
    let order = load(&mut tx, "Order", "1");
    match tx
        .get_relation(&order, &Relationship::named("invoice"))
        .unwrap_err()
    {
        StrataError::UnsupportedCrossBackendRelation {
            relation,
            source_backend,
            target_backend,
            ..
        } => {
            assert_eq!(relation, "invoice");
            assert_eq!(source_backend, "orders");
            assert_eq!(target_backend, "billing");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    tx.close().unwrap();
}

#[test]
fn test_unknown_relation_is_rejected() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    let order = load(&mut tx, "Order", "1");
    let err = tx
        .get_relation(&order, &Relationship::named("refunds"))
        .unwrap_err();
    assert!(matches!(err, StrataError::UnknownRelation { .. }));
    tx.close().unwrap();
}

#[test]
fn test_relation_update_is_compensated() {
    let shop = Shop::new();
    shop.orders.insert(order("1", "PENDING"));
    shop.orders.insert(Record::new("OrderLine").with_id("10"));
    shop.shipping.fail_commit(1, StrataError::storage("carrier api down"));
    let manager = shop.manager();

    let mut tx = manager.begin_transaction();
    tx.create(&EntityRef::new(shipment("s1", "1", "DHL"))).unwrap();
    let order = load(&mut tx, "Order", "1");
    let line = load(&mut tx, "OrderLine", "10");
    tx.update_to_many_relation(&order, "lines", &[line], &[]).unwrap();
    tx.commit().unwrap_err();
    tx.close().unwrap();

    let restored = shop.orders.get("Order", "1").unwrap();
    assert!(restored.relation("lines").is_none());
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_property_routes_by_backend_prefix() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut tx = manager.begin_read_transaction();
    assert_eq!(
        tx.property("orders.region").unwrap(),
        Some(Value::from("eu-west"))
    );
    assert_eq!(tx.property("shipping.region").unwrap(), None);
    assert_eq!(tx.property("warehouse.region").unwrap(), None);
    assert_eq!(tx.property("region").unwrap(), None);
    tx.close().unwrap();
}

// ============================================================================
// Manager
// ============================================================================

#[test]
fn test_manager_transaction_commits_and_closes() {
    let shop = Shop::new();
    let manager = shop.manager();

    let created = manager
        .transaction(|tx| {
            let order = EntityRef::new(order("1", "PENDING"));
            tx.create(&order)?;
            tx.create(&EntityRef::new(shipment("s1", "1", "DHL")))?;
            Ok(order.id())
        })
        .unwrap();

    assert_eq!(created, Some(EntityId::from("1")));
    assert_eq!(shop.orders.count("Order"), 1);
    assert_eq!(calls_of(&shop.log, "close").len(), 2);
}

#[test]
fn test_manager_transaction_cancels_on_error() {
    let shop = Shop::new();
    let manager = shop.manager();

    let err = manager
        .transaction(|tx| {
            tx.create(&EntityRef::new(order("1", "PENDING")))?;
            Err::<(), _>(StrataError::invalid_input("quantity must be positive"))
        })
        .unwrap_err();

    assert!(matches!(err, StrataError::InvalidInput { .. }));
    assert_eq!(calls_of(&shop.log, "cancel"), vec!["orders:cancel"]);
    assert!(calls_of(&shop.log, "commit").is_empty());
    assert_eq!(shop.orders.count("Order"), 0);
}

#[test]
fn test_metrics_track_outcomes() {
    let shop = Shop::new();
    let manager = shop.manager();

    let mut ok = manager.begin_transaction();
    ok.create(&EntityRef::new(order("1", "PENDING"))).unwrap();
    ok.commit().unwrap();
    ok.close().unwrap();

    shop.orders.fail_commit(2, StrataError::storage("disk full"));
    let mut failed = manager.begin_transaction();
    failed.create(&EntityRef::new(order("2", "PENDING"))).unwrap();
    failed.commit().unwrap_err();
    failed.close().unwrap();

    let mut read = manager.begin_read_transaction();
    read.load_many(&EntityProjection::of("Order")).unwrap();
    read.close().unwrap();

    let metrics = manager.metrics();
    assert_eq!(metrics.total_started, 3);
    assert_eq!(metrics.total_committed, 1);
    assert_eq!(metrics.total_aborted, 1);
    assert_eq!(metrics.active_count, 0);
}
