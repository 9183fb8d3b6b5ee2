use hive_core::core::event_store::{EventStore, EventType, ReadFilter};
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn fresh_store() -> EventStore {
    let conn = Connection::open_in_memory().unwrap();
    for statement in hive_core::core::schemas::ALL_STATEMENTS {
        conn.execute(statement, []).unwrap();
    }
    EventStore::new(Arc::new(Mutex::new(conn)))
}

#[test]
fn appends_assign_strictly_increasing_sequence_per_project() {
    let store = fresh_store();
    let a = store
        .append("p1", EventType::AgentRegistered, "tester", json!({"name": "A"}))
        .unwrap();
    let b = store
        .append("p1", EventType::AgentRegistered, "tester", json!({"name": "B"}))
        .unwrap();
    assert_eq!(a.sequence, 1);
    assert_eq!(b.sequence, 2);
}

#[test]
fn sequences_are_independent_per_project() {
    let store = fresh_store();
    let a = store
        .append("p1", EventType::AgentRegistered, "tester", json!({"name": "A"}))
        .unwrap();
    let b = store
        .append("p2", EventType::AgentRegistered, "tester", json!({"name": "A"}))
        .unwrap();
    assert_eq!(a.sequence, 1);
    assert_eq!(b.sequence, 1);
}

#[test]
fn read_after_latest_sequence_returns_empty() {
    let store = fresh_store();
    store
        .append("p1", EventType::AgentRegistered, "tester", json!({"name": "A"}))
        .unwrap();
    let latest = store.latest_sequence("p1").unwrap();
    let events = store.read(&ReadFilter::for_project("p1").after(latest)).unwrap();
    assert!(events.is_empty());
}

#[test]
fn listener_is_notified_for_every_event_in_a_batch() {
    let store = fresh_store();
    let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    store.set_listener(Arc::new(move |event| {
        recorder.lock().unwrap().push(event.sequence);
    }));

    store
        .append_many(
            "p1",
            "tester",
            vec![
                (EventType::CellCreated, json!({"cell_id": "a"})),
                (EventType::CellCreated, json!({"cell_id": "b"})),
                (EventType::CellCreated, json!({"cell_id": "c"})),
            ],
        )
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn offset_resumability_returns_the_remaining_tail() {
    let store = fresh_store();
    for i in 0..10 {
        store
            .append("p1", EventType::AgentActive, "tester", json!({"i": i}))
            .unwrap();
    }
    let tail = store.read(&ReadFilter::for_project("p1").after(7)).unwrap();
    let sequences: Vec<i64> = tail.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![8, 9, 10]);
}
