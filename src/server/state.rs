//! Shared application state for the Stream Server's API handlers.
//!
//! Grounded on `palm-daemon`'s `api/rest/state.rs`: a small, cheaply
//! cloneable struct carrying everything a handler needs, threaded through
//! `axum::extract::State`. hive-core's version additionally owns the
//! per-project broadcast channels that bridge the synchronous core's
//! `EventListener` callback (see `core::event_store::EventStore`) into
//! `tokio::sync::broadcast` subscriptions for SSE.

use crate::core::error::HiveError;
use crate::core::event_store::Event;
use crate::core::registry::Registry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 1024;

/// Shared state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Event>>>>,
    /// The project a bare `GET /cells` / `GET /events` call (with no
    /// `{project_key}` path segment) resolves against.
    pub default_project_key: String,
    default_root: PathBuf,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, default_project_key: String, default_root: PathBuf) -> Self {
        Self {
            registry,
            channels: Arc::new(Mutex::new(HashMap::new())),
            default_project_key,
            default_root,
            started_at: chrono::Utc::now(),
        }
    }

    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds().max(0);
        format!("{}s", secs)
    }

    /// Open (if needed) the project's `Facade` and wire its `EventStore` to
    /// a broadcast channel, returning both the facade and a receiver
    /// subscribed from this moment forward.
    pub fn facade_and_subscribe(
        &self,
        project_key: &str,
    ) -> Result<(Arc<crate::core::facade::Facade>, broadcast::Receiver<Event>), HiveError> {
        // A single server instance serves one workspace root; distinct
        // `project_key`s under `/streams/{project_key}` are distinct logical
        // projects within that same root, not distinct filesystem roots.
        let facade = self.registry.get_or_create(project_key, &self.default_root)?;
        let tx = self.channel_for(project_key, &facade);
        Ok((facade, tx.subscribe()))
    }

    pub fn facade(&self, project_key: &str) -> Result<Arc<crate::core::facade::Facade>, HiveError> {
        self.registry.get_or_create(project_key, &self.default_root)
    }

    fn channel_for(
        &self,
        project_key: &str,
        facade: &Arc<crate::core::facade::Facade>,
    ) -> broadcast::Sender<Event> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(project_key) {
            return tx.clone();
        }

        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let publisher = tx.clone();
        facade.event_store().set_listener(Arc::new(move |event: &Event| {
            let _ = publisher.send(event.clone());
        }));
        channels.insert(project_key.to_string(), tx.clone());
        tx
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
