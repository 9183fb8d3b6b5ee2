//! Stream Server: the axum HTTP surface layered on top of the synchronous
//! core (`crate::core`). Grounded on `mapleaiorg-maple`'s `palm-daemon`
//! crate — the one repo in the pack that builds this shape of component.
//!
//! The core itself never depends on tokio for its correctness; this module
//! is the only place hive-core runs an async runtime, and every call into
//! the core crosses that boundary through `tokio::task::spawn_blocking`.

pub mod handlers;
pub mod router;
pub mod state;

use crate::core::error::HiveError;
use crate::core::registry::Registry;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Bind and run the Stream Server until shutdown, flushing every cached
/// project's dirty cells before the process returns — mirrors
/// `palm-daemon`'s `Server::run`/`shutdown_signal`.
pub async fn serve(addr: SocketAddr, default_project_key: String, root: PathBuf) -> Result<(), HiveError> {
    let registry = Arc::new(Registry::new());
    let state = AppState::new(registry.clone(), default_project_key, root);
    let app = router::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(HiveError::Io)?;

    tracing::info!("hive-core stream server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .map_err(HiveError::Io)?;

    tracing::info!("hive-core stream server shut down");
    Ok(())
}

async fn shutdown_signal(registry: Arc<Registry>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install terminate signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }

    registry.shutdown();
}
