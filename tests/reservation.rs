use hive_core::core::facade::Facade;
use hive_core::core::reservation::{ReleaseFilter, ReserveRequest};
use hive_core::core::store::Project;

fn open_facade() -> (tempfile::TempDir, Facade) {
    let dir = tempfile::tempdir().unwrap();
    let project = Project::new("p1", dir.path());
    let facade = Facade::open(project).unwrap();
    (dir, facade)
}

#[test]
fn conflicting_exclusive_reservation_is_rejected_then_clears_on_release() {
    let (_dir, facade) = open_facade();

    let outcome = facade
        .reserve(ReserveRequest::new("p1", "Agent1", vec!["src/**".to_string()]))
        .unwrap();
    assert_eq!(outcome.granted.len(), 1);

    let conflict = facade
        .reserve(ReserveRequest::new("p1", "Agent2", vec!["src/file.ts".to_string()]))
        .unwrap();
    assert!(conflict.granted.is_empty());
    assert_eq!(conflict.conflicts.len(), 1);
    assert_eq!(conflict.conflicts[0].holder, "Agent1");
    assert_eq!(conflict.conflicts[0].pattern, "src/**");

    facade.release("Agent1", ReleaseFilter::All).unwrap();

    let retry = facade
        .reserve(ReserveRequest::new("p1", "Agent2", vec!["src/file.ts".to_string()]))
        .unwrap();
    assert_eq!(retry.granted.len(), 1);
    assert!(retry.conflicts.is_empty());
}

#[test]
fn force_reserve_grants_despite_conflicts() {
    let (_dir, facade) = open_facade();
    facade
        .reserve(ReserveRequest::new("p1", "Agent1", vec!["src/**".to_string()]))
        .unwrap();

    let mut forced = ReserveRequest::new("p1", "Agent2", vec!["src/file.ts".to_string()]);
    forced.force = true;
    let outcome = facade.reserve(forced).unwrap();
    assert_eq!(outcome.granted.len(), 1);
    assert!(!outcome.conflicts.is_empty());

    let active = facade.check_conflicts("Observer", &["src/file.ts".to_string()]).unwrap();
    let holders: Vec<&str> = active.iter().map(|c| c.holder.as_str()).collect();
    assert!(holders.contains(&"Agent1") || holders.contains(&"Agent2"));
}

#[test]
fn reserving_empty_paths_succeeds_with_nothing_granted() {
    let (_dir, facade) = open_facade();
    let outcome = facade.reserve(ReserveRequest::new("p1", "Agent1", vec![])).unwrap();
    assert!(outcome.granted.is_empty());
    assert!(outcome.conflicts.is_empty());
}

#[test]
fn release_by_path_only_clears_matching_reservations() {
    let (_dir, facade) = open_facade();
    facade
        .reserve(ReserveRequest::new(
            "p1",
            "Agent1",
            vec!["src/a.ts".to_string(), "src/b.ts".to_string()],
        ))
        .unwrap();

    let released = facade
        .release("Agent1", ReleaseFilter::Paths(vec!["src/a.ts".to_string()]))
        .unwrap();
    assert_eq!(released.released, 1);

    let conflict = facade
        .reserve(ReserveRequest::new("p1", "Agent2", vec!["src/b.ts".to_string()]))
        .unwrap();
    assert!(conflict.granted.is_empty());
}
