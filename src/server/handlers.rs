//! HTTP handlers for the Stream Server.
//!
//! Grounded on `palm-daemon`'s `api/rest/handlers/events.rs` and
//! `handlers/health.rs`. Every blocking `Facade` call is wrapped in
//! `tokio::task::spawn_blocking` — the synchronous core never runs directly
//! on an async worker thread.

use crate::core::cell::CellQuery;
use crate::core::error::HiveError;
use crate::core::event_store::{Event, ReadFilter};
use crate::server::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Error response shape shared by every handler: `HiveError::to_envelope()`
/// wrapped with the matching HTTP status.
pub struct ApiError(HiveError);

impl From<HiveError> for ApiError {
    fn from(err: HiveError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HiveError::NotFound(_) => StatusCode::NOT_FOUND,
            HiveError::Validation(_) | HiveError::Ambiguous { .. } => StatusCode::BAD_REQUEST,
            HiveError::LockTimeout { .. } | HiveError::LockContention { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self.0.to_envelope())).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

async fn run_blocking<F, T>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, HiveError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(HiveError::Integrity("blocking task panicked".into()).into()),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub database: String,
    pub uptime: String,
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let facade = state.facade(&state.default_project_key.clone())?;
    let status = run_blocking(move || Ok(facade.health())).await?;
    Ok(Json(HealthResponse {
        healthy: status.healthy,
        database: status.database,
        uptime: state.uptime(),
    }))
}

#[derive(Debug, Serialize)]
pub struct CellsResponse {
    pub cells: Vec<crate::core::cell::Cell>,
}

pub async fn get_cells(State(state): State<AppState>) -> ApiResult<Json<CellsResponse>> {
    let facade = state.facade(&state.default_project_key)?;
    let cells = run_blocking(move || facade.query_cells(CellQuery::default())).await?;
    Ok(Json(CellsResponse { cells }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub live: bool,
    pub limit: Option<i64>,
}

fn default_backlog_limit() -> i64 {
    100
}

/// `GET /streams/{project_key}?offset=N&live={false|true}&limit=L`
pub async fn stream_project(
    State(state): State<AppState>,
    Path(project_key): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    if query.offset < 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "error": {"code": "validation_error", "message": "offset must not be negative"}})),
        )
            .into_response();
    }

    let limit = query.limit.unwrap_or_else(default_backlog_limit);

    if !query.live {
        let key = project_key.clone();
        let backlog = run_blocking(move || {
            let facade = state.facade(&key)?;
            facade.read_events(&ReadFilter::for_project(&key).after(query.offset).limit(limit))
        })
        .await;
        return match backlog {
            Ok(events) => (StatusCode::OK, Json(events)).into_response(),
            Err(err) => err.into_response(),
        };
    }

    match state.facade_and_subscribe(&project_key) {
        Ok((facade, rx)) => {
            let key = project_key.clone();
            let backlog = match run_blocking(move || {
                facade.read_events(&ReadFilter::for_project(&key).after(query.offset).limit(limit))
            })
            .await
            {
                Ok(events) => events,
                Err(err) => return err.into_response(),
            };
            sse_response(backlog, rx).into_response()
        }
        Err(err) => ApiError(err).into_response(),
    }
}

/// `GET /events` — live streaming against the server's configured project.
pub async fn stream_default_project(State(state): State<AppState>) -> Response {
    let project_key = state.default_project_key.clone();
    match state.facade_and_subscribe(&project_key) {
        Ok((facade, rx)) => {
            let backlog = match run_blocking(move || {
                facade.read_events(&ReadFilter::for_project(&project_key))
            })
            .await
            {
                Ok(events) => events,
                Err(err) => return err.into_response(),
            };
            sse_response(backlog, rx).into_response()
        }
        Err(err) => ApiError(err).into_response(),
    }
}

fn sse_response(
    backlog: Vec<Event>,
    rx: tokio::sync::broadcast::Receiver<Event>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let connected = stream::once(async { Ok(SseEvent::default().comment("connected")) });

    let backlog_stream = stream::iter(backlog.into_iter().map(|event| {
        let json = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().data(json))
    }));

    let live_stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(SseEvent::default().data(json)), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(connected.chain(backlog_stream).chain(live_stream)).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(15)).text("ping"),
    )
}
