//! REST handlers.
//!
//! Every successful write emits one change signal for its kind, after the
//! store has committed. Reads never emit.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use hibi_types::{
    CacheScope, EntityId, EntityKind, Filter, Label, Note, Person, Record, Task, TaskInput,
};
use serde::Deserialize;
use serde_json::json;
use tracing::Instrument;

use crate::events;
use crate::notifier::ChangeNotifier;
use crate::store::{Store, StoreError};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub notifier: ChangeNotifier,
    /// Heartbeat period for event streams.
    pub keepalive: Duration,
}

impl AppState {
    pub fn new(store: Store, notifier: ChangeNotifier, keepalive: Duration) -> Self {
        Self { store: Arc::new(store), notifier, keepalive }
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", get(events::stream_events))
        .route("/api/todos", get(list_tasks).post(create_task))
        .route("/api/todos/reorder", post(reorder_tasks))
        .route("/api/todos/:id", patch(update::<Task>).delete(remove::<Task>))
        .route("/api/todos/:id/subtasks/:subtask_id/toggle", post(toggle_subtask))
        .route("/api/people", get(list::<Person>).post(create::<Person>))
        .route("/api/people/:id", patch(update::<Person>).delete(remove::<Person>))
        .route("/api/notes", get(list::<Note>).post(create::<Note>))
        .route("/api/notes/:id", patch(update::<Note>).delete(remove::<Note>))
        .route("/api/labels", get(list::<Label>).post(create::<Label>))
        .route("/api/labels/:id", delete(delete_label))
        .layer(middleware::from_fn(trace_context))
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error rendered as `{"error": "<message>"}`.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for HttpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => HttpError::NotFound(err.to_string()),
            StoreError::Validation(e) => HttpError::BadRequest(e.to_string()),
            StoreError::Sqlite(_) | StoreError::Corrupt { .. } => {
                tracing::error!(error = %err, "store failure");
                HttpError::Internal("internal error".to_string())
            }
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            HttpError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            HttpError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            HttpError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type HttpResult<T> = Result<T, HttpError>;

// ============================================================================
// Middleware
// ============================================================================

/// Run each request inside a span parented on the caller's W3C trace context.
async fn trace_context(req: Request, next: Next) -> Response {
    // Borrows of `req` end here; the body is !Sync and the future must be Send.
    let span = {
        let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());
        hibi_telemetry::request_span(
            req.method().as_str(),
            req.uri().path(),
            header(hibi_telemetry::TRACEPARENT),
            header(hibi_telemetry::TRACESTATE),
        )
    };
    next.run(req).instrument(span).await
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    search: Option<String>,
    year: Option<i32>,
}

impl ListQuery {
    fn into_filter(self) -> Filter {
        Filter {
            search: self.search.filter(|s| !s.trim().is_empty()),
            year: self.year,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TaskQuery {
    #[serde(default)]
    archived: bool,
    search: Option<String>,
    year: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ReorderBody {
    ids: Vec<EntityId>,
}

#[derive(Debug, Deserialize)]
struct ToggleBody {
    completed: bool,
}

/// Single list scope for the non-task kinds.
fn scope_of(kind: EntityKind) -> CacheScope {
    match kind {
        EntityKind::Todos => CacheScope::Tasks,
        EntityKind::People => CacheScope::People,
        EntityKind::NotebookNotes => CacheScope::NotebookNotes,
        EntityKind::Labels => CacheScope::Labels,
    }
}

async fn list<T: Record>(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> HttpResult<Json<Vec<T>>> {
    let items = state.store.list::<T>(scope_of(T::KIND), &query.into_filter())?;
    Ok(Json(items))
}

async fn create<T: Record>(
    State(state): State<AppState>,
    Json(input): Json<T::Input>,
) -> HttpResult<(StatusCode, Json<T>)> {
    let record = state.store.create::<T>(input)?;
    state.notifier.emit(T::KIND);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update<T: Record>(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(patch): Json<T::Patch>,
) -> HttpResult<Json<T>> {
    let record = state.store.update::<T>(&id, &patch)?;
    state.notifier.emit(T::KIND);
    Ok(Json(record))
}

async fn remove<T: Record>(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> HttpResult<Json<serde_json::Value>> {
    state.store.delete::<T>(&id)?;
    state.notifier.emit(T::KIND);
    Ok(Json(json!({ "success": true })))
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskQuery>,
) -> HttpResult<Json<Vec<Task>>> {
    let scope = if query.archived { CacheScope::ArchivedTasks } else { CacheScope::Tasks };
    let filter = ListQuery { search: query.search, year: query.year }.into_filter();
    Ok(Json(state.store.list::<Task>(scope, &filter)?))
}

async fn create_task(
    State(state): State<AppState>,
    Json(input): Json<TaskInput>,
) -> HttpResult<(StatusCode, Json<Task>)> {
    let task = state.store.create_task(input)?;
    state.notifier.emit(EntityKind::Todos);
    Ok((StatusCode::CREATED, Json(task)))
}

async fn reorder_tasks(
    State(state): State<AppState>,
    Json(body): Json<ReorderBody>,
) -> HttpResult<Json<Vec<Task>>> {
    let tasks = state.store.reorder_tasks(&body.ids)?;
    state.notifier.emit(EntityKind::Todos);
    Ok(Json(tasks))
}

async fn toggle_subtask(
    State(state): State<AppState>,
    Path((id, subtask_id)): Path<(EntityId, String)>,
    Json(body): Json<ToggleBody>,
) -> HttpResult<Json<Task>> {
    let task = state.store.toggle_subtask(&id, &subtask_id, body.completed)?;
    state.notifier.emit(EntityKind::Todos);
    Ok(Json(task))
}

async fn delete_label(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> HttpResult<Json<serde_json::Value>> {
    state.store.delete_label(&id)?;
    state.notifier.emit(EntityKind::Labels);
    // Tasks carrying the label were rewritten too.
    state.notifier.emit(EntityKind::Todos);
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status() {
        let not_found = HttpError::from(StoreError::NotFound { kind: "todos", id: "t_x".into() });
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let invalid = HttpError::from(StoreError::Validation(hibi_types::ValidationError::Empty("title")));
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let broken = HttpError::from(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
        assert_eq!(broken.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_blank_search_is_unfiltered() {
        let filter = ListQuery { search: Some("  ".into()), year: None }.into_filter();
        assert!(filter.is_unfiltered());
    }
}
