use hive_core::core::facade::Facade;
use hive_core::core::store::Project;

#[test]
fn reopening_a_project_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    {
        let facade = Facade::open(Project::new("p", dir.path())).unwrap();
        assert!(facade.health().healthy);
    }
    // Second open against the same root re-runs migration/import bookkeeping
    // without failing or duplicating state.
    let facade = Facade::open(Project::new("p", dir.path())).unwrap();
    assert!(facade.health().healthy);
}

#[test]
fn legacy_beads_directory_is_migrated_to_hive_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join(".beads");
    std::fs::create_dir_all(&legacy).unwrap();
    std::fs::write(
        legacy.join("issues.jsonl"),
        r#"{"id":"bg-legacy","title":"Legacy bug","description":null,"status":"open","priority":1,"issue_type":"bug","created_at":"2026-01-01T00:00:00.000Z","updated_at":"2026-01-01T00:00:00.000Z","parent_id":null,"assignee":null}
"#,
    )
    .unwrap();

    let facade = Facade::open(Project::new("p", dir.path())).unwrap();
    assert!(dir.path().join(".hive").exists());
    assert!(!legacy.exists());

    let cells = facade.query_cells(Default::default()).unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].id, "bg-legacy");
}
