//! End-to-end scenarios exercising the Facade the way a real agent session
//! would: register, message, reserve, track cells, and recover from a
//! legacy JSONL seed file.

use hive_core::core::cell::{CellArgs, CellRecord, CellType};
use hive_core::core::facade::{Facade, Importance, InboxArgs, RegisterAgentArgs, SendMessageArgs};
use hive_core::core::import;
use hive_core::core::reservation::{ReleaseFilter, ReserveRequest};
use hive_core::core::store::Project;
use std::fs;

fn open_facade(project_key: &str, dir: &std::path::Path) -> Facade {
    Facade::open(Project::new(project_key, dir)).unwrap()
}

fn register(facade: &Facade, name: &str) {
    facade
        .register_agent(RegisterAgentArgs {
            agent_name: Some(name.to_string()),
            ..Default::default()
        })
        .unwrap();
}

#[test]
fn s1_register_and_echo() {
    let dir = tempfile::tempdir().unwrap();
    let facade = open_facade("p", dir.path());
    register(&facade, "BlueLake");
    register(&facade, "Reader");

    let sent = facade
        .send_message(SendMessageArgs {
            from: "BlueLake".into(),
            to: vec!["Reader".into()],
            subject: "Hi".into(),
            body: "World".into(),
            thread_id: None,
            importance: Importance::Normal,
            ack_required: false,
        })
        .unwrap();

    let inbox = facade
        .inbox(InboxArgs {
            agent: "Reader".into(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from_agent, "BlueLake");
    assert_eq!(inbox[0].subject, "Hi");
    assert!(inbox[0].body.is_none());

    let detail = facade
        .read_message(&sent.message_id, Some("Reader"), true)
        .unwrap();
    assert_eq!(detail.body, "World");

    let unread = facade
        .inbox(InboxArgs {
            agent: "Reader".into(),
            unread_only: true,
            ..Default::default()
        })
        .unwrap();
    assert!(unread.is_empty());
}

#[test]
fn s2_reservation_conflict_then_release_clears_it() {
    let dir = tempfile::tempdir().unwrap();
    let facade = open_facade("p", dir.path());

    let granted = facade
        .reserve(ReserveRequest::new("p", "Agent1", vec!["src/**".to_string()]))
        .unwrap();
    assert_eq!(granted.granted.len(), 1);

    let conflict = facade
        .reserve(ReserveRequest::new("p", "Agent2", vec!["src/file.ts".to_string()]))
        .unwrap();
    assert!(conflict.granted.is_empty());
    assert_eq!(conflict.conflicts.len(), 1);
    assert_eq!(conflict.conflicts[0].holder, "Agent1");
    assert_eq!(conflict.conflicts[0].pattern, "src/**");

    facade.release("Agent1", ReleaseFilter::All).unwrap();
    let retry = facade
        .reserve(ReserveRequest::new("p", "Agent2", vec!["src/file.ts".to_string()]))
        .unwrap();
    assert_eq!(retry.granted.len(), 1);
    assert!(retry.conflicts.is_empty());
}

#[test]
fn s3_exclusive_lock_force_grants_over_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let facade = open_facade("p", dir.path());

    facade
        .reserve(ReserveRequest::new("p", "Agent1", vec!["src/file.ts".to_string()]))
        .unwrap();

    let mut forced = ReserveRequest::new("p", "Agent2", vec!["src/file.ts".to_string()]);
    forced.force = true;
    let outcome = facade.reserve(forced).unwrap();
    assert_eq!(outcome.granted.len(), 1);
    assert!(!outcome.conflicts.is_empty());

    let active = facade.check_conflicts("Observer", &["src/file.ts".to_string()]).unwrap();
    assert!(active.iter().any(|c| c.holder == "Agent1" || c.holder == "Agent2"));
}

#[test]
fn s4_epic_creation_is_atomic() {
    let dir = tempfile::tempdir().unwrap();
    let facade = open_facade("p", dir.path());

    let epic_args = CellArgs::new(CellType::Epic, "E");
    let subtasks = vec![CellArgs::new(CellType::Task, "A"), CellArgs::new(CellType::Task, "B")];
    let (epic, children) = facade.create_epic("tester", epic_args, subtasks).unwrap();

    assert_eq!(children.len(), 2);
    let latest = facade.latest_sequence().unwrap();
    assert_eq!(latest, 3);
    assert!(facade.get_cell(&epic.id).is_ok());
}

#[test]
fn s5_event_reads_are_resumable_by_offset() {
    let dir = tempfile::tempdir().unwrap();
    let facade = open_facade("p", dir.path());
    for i in 0..10 {
        register(&facade, &format!("Agent{i}"));
    }

    let all = facade
        .read_events(&hive_core::core::event_store::ReadFilter::for_project("p"))
        .unwrap();
    assert_eq!(all.len(), 10);

    let tail = facade
        .read_events(&hive_core::core::event_store::ReadFilter::for_project("p").after(7))
        .unwrap();
    let sequences: Vec<i64> = tail.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![8, 9, 10]);
}

#[test]
fn s6_jsonl_round_trip_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let hive_dir = dir.path().join(".hive");
    fs::create_dir_all(&hive_dir).unwrap();

    let seed = vec![
        CellRecord {
            id: "bg-aaaaaa".into(),
            title: "Open bug".into(),
            description: None,
            status: "open".into(),
            priority: 1,
            issue_type: "bug".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
            closed_at: None,
            parent_id: None,
            assignee: None,
            dependencies: None,
            metadata: None,
        },
        CellRecord {
            id: "ft-bbbbbb".into(),
            title: "New feature".into(),
            description: Some("details".into()),
            status: "in_progress".into(),
            priority: 2,
            issue_type: "feature".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:00.000Z".into(),
            closed_at: None,
            parent_id: None,
            assignee: Some("BlueLake".into()),
            dependencies: None,
            metadata: None,
        },
        CellRecord {
            id: "ch-cccccc".into(),
            title: "Done chore".into(),
            description: None,
            status: "closed".into(),
            priority: 3,
            issue_type: "chore".into(),
            created_at: "2026-01-01T00:00:00.000Z".into(),
            updated_at: "2026-01-01T00:00:01.000Z".into(),
            closed_at: Some("2026-01-01T00:00:01.000Z".into()),
            parent_id: None,
            assignee: None,
            dependencies: None,
            metadata: None,
        },
    ];

    let issues_path = hive_dir.join("issues.jsonl");
    let body: String = seed
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";
    fs::write(&issues_path, body).unwrap();

    let facade = open_facade("p", dir.path());
    let cells = facade.query_cells(Default::default()).unwrap();
    assert_eq!(cells.len(), 3);

    facade.flush_cells().unwrap();
    let roundtripped = import::read_jsonl(&issues_path).unwrap();
    assert_eq!(roundtripped.len(), 3);

    let mut ids: Vec<&str> = roundtripped.iter().map(|r| r.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["bg-aaaaaa", "ch-cccccc", "ft-bbbbbb"]);
}
