//! Integration tests for the ledger, hierarchy and connections working
//! together through an application.

use rvledger::matchers::from_fn;
use rvledger::{
    AnyOf, Application, ConnectionKey, LedgerConfig, LedgerEvent, Matcher, MemoryBus, Message,
    RecordMatcher, RvConnection, SortDirection, SortKey, State,
};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_app() -> (Application, MemoryBus) {
    init_logging();
    let bus = MemoryBus::new();
    let app = Application::new(LedgerConfig::default(), Arc::new(bus.clone()));
    (app, bus)
}

fn connect(app: &Application, service: &str, description: &str, subjects: &[&str]) -> Arc<RvConnection> {
    let connection = RvConnection::new(ConnectionKey::new(service, "", "local"), description);
    for subject in subjects {
        connection.add_subject(subject).unwrap();
    }
    assert!(app.connections().add(connection.clone()));
    connection.start().unwrap();
    connection
}

// --- Realistic Workflow Tests ---

#[test]
fn test_monitoring_session() {
    let (mut app, bus) = test_app();
    let ledger_events = app.ledger().subscribe();
    connect(&app, "7500", "market data", &["PRICES.>", "_RV.>"]);

    bus.publish(&Message::new("PRICES.EQ.IBM").with_field("bid", 101.5));
    bus.publish(&Message::new("PRICES.EQ.MSFT").with_field("bid", 330.0));
    bus.publish(&Message::new("PRICES.FX.ERROR").with_field("reason", "stale"));
    bus.publish(&Message::new("_RV.WARN.SYSTEM.SLOWCONSUMER"));
    bus.publish(&Message::new("ORDERS.NEW"));

    assert_eq!(app.pump(), 4);
    assert_eq!(app.ledger().len(), 4);
    assert_eq!(
        ledger_events.try_recv().unwrap(),
        LedgerEvent::Inserted { first: 0, count: 4 }
    );

    let hierarchy = app.hierarchy();
    let prices = hierarchy.get(hierarchy.find("PRICES").unwrap()).unwrap();
    assert_eq!(prices.records_under(), 3);
    assert!(prices.error_under());

    let eq = hierarchy.get(hierarchy.find("PRICES.EQ").unwrap()).unwrap();
    assert!(!eq.error_under());

    // System wins over Warning for "_RV." subjects.
    let types = app.record_types();
    let system = app.ledger().get(3).unwrap();
    assert_eq!(types.first_matching_type(&system).name(), "System");
}

#[test]
fn test_search_snapshot_ignores_later_records() {
    let (mut app, _) = test_app();
    for subject in ["A.ONE", "B.TWO", "A.THREE"] {
        let record = app.record(Message::new(subject)).unwrap();
        app.ingest(record);
    }

    let results = app.search(Arc::new(RecordMatcher::send_subject_starts_with("A.")));
    assert_eq!(results.len(), 2);
    assert!(results.is_frozen());

    let record = app.record(Message::new("A.FOUR")).unwrap();
    app.ingest(record);
    assert_eq!(results.len(), 2);

    results.set_frozen(false);
    assert_eq!(results.len(), 3);
}

#[test]
fn test_view_follows_type_selection() {
    let (mut app, _) = test_app();
    for subject in ["_RV.INFO", "APP.ERROR", "APP.OK", "APP.OK"] {
        let record = app.record(Message::new(subject)).unwrap();
        app.ingest(record);
    }

    let view = app.filtered_view();
    assert_eq!(view.len(), 4);

    let types = app.record_types();
    let system = types.get_by_name("System").unwrap();
    types.set_selected(&system, false);
    assert_eq!(view.len(), 3);

    types.set_selected(&types.default_type(), false);
    assert_eq!(view.len(), 1);
    assert_eq!(view.get(0).unwrap().send_subject(), "APP.ERROR");

    types.set_selected(&system, true);
    types.set_selected(&types.default_type(), true);
    let errors: Arc<dyn Matcher> = Arc::new(RecordMatcher::send_subject_contains("ERROR"));
    let system: Arc<dyn Matcher> = Arc::new(RecordMatcher::send_subject_starts_with("_"));
    let filter = view.add_filter(Arc::new(AnyOf(vec![errors, system])));
    assert_eq!(view.len(), 2);

    view.remove_filter(filter);
    view.set_sort(Some((SortKey::SendSubject, SortDirection::Descending)));
    let subjects: Vec<String> = view.to_vec().iter().map(|r| r.send_subject().to_string()).collect();
    assert_eq!(subjects, ["_RV.INFO", "APP.OK", "APP.OK", "APP.ERROR"]);
}

#[test]
fn test_view_over_view() {
    let (mut app, _) = test_app();
    for i in 0..10 {
        let record = app.record(Message::new(format!("N.{}", i))).unwrap();
        app.ingest(record);
    }

    let outer = Arc::new(app.filtered_view());
    outer.add_filter(Arc::new(from_fn(|r| r.sequence().0 % 2 == 0)));

    let inner = rvledger::FilteredLedgerView::new(outer.clone(), None);
    inner.add_filter(Arc::new(from_fn(|r| r.sequence().0 > 5)));
    assert_eq!(inner.len(), 3);

    let record = app.record(Message::new("N.10")).unwrap();
    app.ingest(record);
    assert_eq!(inner.len(), 3);
    let record = app.record(Message::new("N.11")).unwrap();
    app.ingest(record);
    assert_eq!(inner.len(), 4);
}

#[test]
fn test_pause_discards_and_resume_continues() {
    let (mut app, bus) = test_app();
    let connection = connect(&app, "7500", "orders", &["ORDERS.*"]);

    bus.publish(&Message::new("ORDERS.NEW"));
    connection.pause().unwrap();
    bus.publish(&Message::new("ORDERS.AMEND"));
    connection.start().unwrap();
    bus.publish(&Message::new("ORDERS.CANCEL"));

    assert_eq!(app.pump(), 2);
    let subjects: Vec<String> = app
        .ledger()
        .to_vec()
        .iter()
        .map(|r| r.send_subject().to_string())
        .collect();
    assert_eq!(subjects, ["ORDERS.NEW", "ORDERS.CANCEL"]);
}

#[test]
fn test_republish_through_connection() {
    let (mut app, _bus) = test_app();
    let connection = connect(&app, "7500", "echo", &["ECHO.>"]);

    connection
        .publish(&Message::new("ECHO.1").with_reply("_INBOX.X"))
        .unwrap();
    assert_eq!(app.pump(), 1);

    let record = app.ledger().get(0).unwrap();
    assert_eq!(record.reply_subject(), "_INBOX.X");
    assert_eq!(record.connection_key(), Some(connection.key().clone()));
}

#[test]
fn test_transport_threads_post_records() {
    let (mut app, bus) = test_app();
    connect(&app, "7500", "load", &["LOAD.>"]);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    bus.publish(&Message::new(format!("LOAD.T{}.M{}", t, i % 5)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(app.pump(), 1000);
    let hierarchy = app.hierarchy();
    assert_eq!(hierarchy.root().records_under(), 1000);
    let t0 = hierarchy.get(hierarchy.find("LOAD.T0").unwrap()).unwrap();
    assert_eq!(t0.records_under(), 250);

    let mut sequences: Vec<u64> = app.ledger().to_vec().iter().map(|r| r.sequence().0).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 1000);
}

#[test]
fn test_bounded_inbound_drops_overflow() {
    let bus = MemoryBus::new();
    let config = LedgerConfig {
        inbound_capacity: Some(2),
        ..Default::default()
    };
    let mut app = Application::new(config, Arc::new(bus.clone()));
    connect(&app, "7500", "burst", &["X"]);

    for _ in 0..5 {
        bus.publish(&Message::new("X"));
    }
    assert_eq!(app.pump(), 2);
}

// --- Projects and Interchange ---

#[test]
fn test_project_switch() {
    let dir = TempDir::new().unwrap();
    let first_path = dir.path().join("first.json");
    let (mut app, bus) = test_app();

    connect(&app, "7500", "prices", &["PRICES.>"]);
    app.record_types()
        .create_type(
            "Equities",
            rvledger::Colour::RED,
            RecordMatcher::send_subject_starts_with("PRICES.EQ"),
        )
        .unwrap();
    app.save_project(&first_path).unwrap();

    bus.publish(&Message::new("PRICES.EQ.IBM"));
    app.pump();
    assert_eq!(app.ledger().len(), 1);

    app.close_project();
    assert!(app.connections().is_empty());
    assert!(app.ledger().is_empty());
    assert_eq!(app.hierarchy().node_count(), 0);
    assert!(app.record_types().get_by_name("Equities").is_none());

    app.open_project(&first_path).unwrap();
    let connection = app.connections().to_vec().remove(0);
    assert_eq!(connection.state(), State::Started);
    assert!(app.record_types().get_by_name("Equities").is_some());

    bus.publish(&Message::new("PRICES.EQ.IBM"));
    app.pump();
    let record = app.ledger().get(0).unwrap();
    assert_eq!(record.sequence(), rvledger::SequenceGenerator::FIRST);
    assert_eq!(app.record_types().first_matching_type(&record).name(), "Equities");
}

#[test]
fn test_open_without_autostart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let (mut source, _) = test_app();
    connect(&source, "7500", "prices", &["PRICES.>"]);
    source.save_project(&path).unwrap();

    let config = LedgerConfig {
        start_connections_on_open: false,
        ..Default::default()
    };
    let mut app = Application::new(config, Arc::new(MemoryBus::new()));
    app.open_project(&path).unwrap();
    assert_eq!(app.connections().to_vec()[0].state(), State::Stopped);
}

#[test]
fn test_export_import_links_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("capture.rvs");
    let (mut app, bus) = test_app();
    let connection = connect(&app, "7500", "prices", &["PRICES.>"]);

    bus.publish(&Message::new("PRICES.EQ.IBM").with_tracking_id("trk-1"));
    bus.publish(&Message::new("PRICES.EQ.MSFT"));
    app.pump();
    app.export_records(&path, &app.ledger().to_vec()).unwrap();

    let (mut other, _) = test_app();
    assert_eq!(other.import_records(&path).unwrap(), 2);

    let imported = other.ledger().to_vec();
    assert_eq!(imported[0].tracking_id(), "trk-1");
    assert_eq!(imported[0].connection_key(), Some(connection.key().clone()));
    let created = other.connections().get(connection.key()).unwrap();
    assert_eq!(created.description(), "prices");
    assert_eq!(created.state(), State::Stopped);
    assert_eq!(other.hierarchy().root().records_under(), 2);
}
