use hive_core::core::cell::{CellArgs, CellPatch, CellQuery, CellStatus, CellType};
use hive_core::core::error::HiveError;
use hive_core::core::facade::Facade;
use hive_core::core::store::Project;

fn open_facade() -> (tempfile::TempDir, Facade) {
    let dir = tempfile::tempdir().unwrap();
    let project = Project::new("p1", dir.path());
    let facade = Facade::open(project).unwrap();
    (dir, facade)
}

#[test]
fn create_and_resolve_by_partial_id() {
    let (_dir, facade) = open_facade();
    let cell = facade
        .create_cell("tester", CellArgs::new(CellType::Bug, "Fix the thing"))
        .unwrap();

    let prefix = &cell.id[..cell.id.len() - 1];
    let found = facade.get_cell(prefix).unwrap();
    assert_eq!(found.id, cell.id);
}

#[test]
fn status_transitions_follow_the_state_machine() {
    let (_dir, facade) = open_facade();
    let cell = facade
        .create_cell("tester", CellArgs::new(CellType::Task, "Do work"))
        .unwrap();
    assert_eq!(cell.status, CellStatus::Open);

    let started = facade
        .change_cell_status(&cell.id, "tester", CellStatus::InProgress)
        .unwrap();
    assert_eq!(started.status, CellStatus::InProgress);

    let closed = facade.close_cell(&cell.id, "tester", Some("done")).unwrap();
    assert_eq!(closed.status, CellStatus::Closed);
    assert!(closed.closed_at.is_some());
}

#[test]
fn closing_an_already_closed_cell_is_a_no_op() {
    let (_dir, facade) = open_facade();
    let cell = facade
        .create_cell("tester", CellArgs::new(CellType::Chore, "Tidy up"))
        .unwrap();
    facade.close_cell(&cell.id, "tester", None).unwrap();
    let second = facade.close_cell(&cell.id, "tester", None).unwrap();
    assert_eq!(second.status, CellStatus::Closed);
}

#[test]
fn update_cell_leaves_unset_fields_unchanged() {
    let (_dir, facade) = open_facade();
    let cell = facade
        .create_cell("tester", CellArgs::new(CellType::Feature, "Ship it"))
        .unwrap();

    let patch = CellPatch {
        priority: Some(0),
        ..Default::default()
    };
    let updated = facade.update_cell(&cell.id, patch).unwrap();
    assert_eq!(updated.priority, 0);
    assert_eq!(updated.title, "Ship it");
}

#[test]
fn create_epic_atomically_creates_epic_and_subtasks() {
    let (_dir, facade) = open_facade();
    let mut epic_args = CellArgs::new(CellType::Epic, "E");
    epic_args.priority = 1;
    let subtasks = vec![
        CellArgs::new(CellType::Task, "A"),
        CellArgs::new(CellType::Task, "B"),
    ];

    let (epic, children) = facade.create_epic("tester", epic_args, subtasks).unwrap();
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.parent_id.as_deref(), Some(epic.id.as_str()));
    }

    let listed = facade
        .query_cells(CellQuery {
            parent_id: Some(epic.id.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(listed.len(), 2);
}

#[test]
fn get_next_ready_cell_prefers_lowest_priority_value() {
    let (_dir, facade) = open_facade();
    let mut low = CellArgs::new(CellType::Task, "low priority");
    low.priority = 2;
    let mut high = CellArgs::new(CellType::Task, "high priority");
    high.priority = 0;

    facade.create_cell("tester", low).unwrap();
    let urgent = facade.create_cell("tester", high).unwrap();

    let next = facade.get_next_ready_cell().unwrap().unwrap();
    assert_eq!(next.id, urgent.id);
}

#[test]
fn ambiguous_prefix_is_rejected() {
    let (_dir, facade) = open_facade();
    facade
        .create_cell("tester", CellArgs::new(CellType::Bug, "first"))
        .unwrap();
    facade
        .create_cell("tester", CellArgs::new(CellType::Bug, "second"))
        .unwrap();

    match facade.get_cell("bg") {
        Err(HiveError::Ambiguous { .. }) | Err(HiveError::NotFound(_)) => {}
        other => panic!("expected ambiguous or not-found prefix match, got {other:?}"),
    }
}
