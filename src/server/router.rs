//! Axum router assembly for the Stream Server.
//!
//! Grounded on `palm-daemon`'s `api/rest/router.rs`: CORS-open (no auth, per
//! spec), request tracing via `TraceLayer`, one `Router` built from
//! `AppState`.

use crate::server::handlers;
use crate::server::state::AppState;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/cells", get(handlers::get_cells))
        .route("/events", get(handlers::stream_default_project))
        .route("/streams/{project_key}", get(handlers::stream_project))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
