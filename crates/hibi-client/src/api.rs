//! Entity Store access.
//!
//! [`EntityApi`] is the plain CRUD contract the sync layer consumes, one
//! implementation per record type; [`TaskApi`] adds the two task-only
//! operations. [`HttpStore`] implements all of them over the REST API, and
//! tests substitute in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hibi_types::{CacheKey, CacheScope, EntityId, EntityKind, Label, Note, Person, Record, Task};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure talking to the Entity Store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Transport(String),
    /// Non-success status. `message` is the server's `error` field when present.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// Success status, but the body did not decode.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ApiError::Status { status, message: message.into() }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// CRUD over one record type.
#[async_trait]
pub trait EntityApi<T: Record>: Send + Sync {
    async fn list(&self, key: &CacheKey) -> Result<Vec<T>, ApiError>;
    async fn create(&self, input: &T::Input) -> Result<T, ApiError>;
    async fn update(&self, id: &EntityId, patch: &T::Patch) -> Result<T, ApiError>;
    async fn delete(&self, id: &EntityId) -> Result<(), ApiError>;
}

/// Task-only store operations.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Apply an explicit order; returns the whole active list.
    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<Vec<Task>, ApiError>;
    async fn toggle_subtask(
        &self,
        task_id: &EntityId,
        subtask_id: &str,
        completed: bool,
    ) -> Result<Task, ApiError>;
}

/// One handle per store contract, all usually backed by the same object.
#[derive(Clone)]
pub struct Apis {
    pub tasks: Arc<dyn EntityApi<Task>>,
    pub task_ops: Arc<dyn TaskApi>,
    pub people: Arc<dyn EntityApi<Person>>,
    pub notes: Arc<dyn EntityApi<Note>>,
    pub labels: Arc<dyn EntityApi<Label>>,
}

impl Apis {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: EntityApi<Task>
            + TaskApi
            + EntityApi<Person>
            + EntityApi<Note>
            + EntityApi<Label>
            + 'static,
    {
        Self {
            tasks: backend.clone(),
            task_ops: backend.clone(),
            people: backend.clone(),
            notes: backend.clone(),
            labels: backend,
        }
    }
}

/// REST collection path for a kind.
fn collection_path(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Todos => "/api/todos",
        EntityKind::People => "/api/people",
        EntityKind::NotebookNotes => "/api/notes",
        EntityKind::Labels => "/api/labels",
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct ReorderBody<'a> {
    ids: &'a [EntityId],
}

#[derive(Serialize)]
struct ToggleBody {
    completed: bool,
}

/// [`EntityApi`] + [`TaskApi`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url, timeout }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn item_url(&self, kind: EntityKind, id: &EntityId) -> String {
        self.url(&format!("{}/{}", collection_path(kind), id))
    }

    /// Send with trace headers and timeout; decode a success body, or turn a
    /// failure body into [`ApiError::Status`].
    async fn send<R: DeserializeOwned>(&self, req: RequestBuilder) -> Result<R, ApiError> {
        let mut req = req.timeout(self.timeout);
        for (name, value) in hibi_telemetry::inject_trace_headers() {
            req = req.header(name, value);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(error_from(status, resp).await);
        }
        Ok(resp.json::<R>().await?)
    }
}

async fn error_from(status: StatusCode, resp: reqwest::Response) -> ApiError {
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_string(),
    };
    ApiError::status(status.as_u16(), message)
}

#[async_trait]
impl<T: Record> EntityApi<T> for HttpStore {
    async fn list(&self, key: &CacheKey) -> Result<Vec<T>, ApiError> {
        let mut query = key.filter.query_pairs();
        if key.scope == CacheScope::ArchivedTasks {
            query.push(("archived", "true".to_string()));
        }
        let req = self.client.get(self.url(collection_path(T::KIND))).query(&query);
        self.send(req).await
    }

    async fn create(&self, input: &T::Input) -> Result<T, ApiError> {
        let req = self.client.post(self.url(collection_path(T::KIND))).json(input);
        self.send(req).await
    }

    async fn update(&self, id: &EntityId, patch: &T::Patch) -> Result<T, ApiError> {
        let req = self.client.patch(self.item_url(T::KIND, id)).json(patch);
        self.send(req).await
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
        let req = self.client.delete(self.item_url(T::KIND, id));
        let _: serde_json::Value = self.send(req).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskApi for HttpStore {
    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<Vec<Task>, ApiError> {
        let req = self
            .client
            .post(self.url("/api/todos/reorder"))
            .json(&ReorderBody { ids: ordered_ids });
        self.send(req).await
    }

    async fn toggle_subtask(
        &self,
        task_id: &EntityId,
        subtask_id: &str,
        completed: bool,
    ) -> Result<Task, ApiError> {
        let path = format!("/api/todos/{task_id}/subtasks/{subtask_id}/toggle");
        let req = self.client.post(self.url(&path)).json(&ToggleBody { completed });
        self.send(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let store = HttpStore::new("http://localhost:4780/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.base_url(), "http://localhost:4780");
        assert_eq!(
            store.item_url(EntityKind::NotebookNotes, &EntityId::new("n_1")),
            "http://localhost:4780/api/notes/n_1"
        );
    }

    #[test]
    fn test_status_error_displays_server_message() {
        let err = ApiError::status(400, "title must not be empty");
        assert_eq!(err.to_string(), "title must not be empty");
    }
}
