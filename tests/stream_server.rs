use axum::body::Body;
use axum::http::{Request, StatusCode};
use hive_core::core::registry::Registry;
use hive_core::server::{router, state::AppState};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (tempfile::TempDir, axum::Router) {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new());
    let state = AppState::new(registry, "p".to_string(), dir.path().to_path_buf());
    (dir, router::create_router(state))
}

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, app) = app();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn cells_starts_empty_for_a_fresh_project() {
    let (_dir, app) = app();
    let response = app
        .oneshot(Request::builder().uri("/cells").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["cells"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn stream_backlog_honors_offset() {
    let (_dir, app) = app();
    // Seed 3 events directly through the registry the router shares state with.
    {
        use hive_core::core::facade::{Facade, RegisterAgentArgs};
        use hive_core::core::store::Project;
        let facade = Facade::open(Project::new("p", _dir.path())).unwrap();
        for i in 0..3 {
            facade
                .register_agent(RegisterAgentArgs {
                    agent_name: Some(format!("Agent{i}")),
                    ..Default::default()
                })
                .unwrap();
        }
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/streams/p?offset=0&live=false&limit=100")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn stream_rejects_negative_offset() {
    let (_dir, app) = app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/streams/p?offset=-1&live=false")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
