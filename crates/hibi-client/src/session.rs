//! One application session: caches, coordinator, undo surface, refetcher, and
//! at most one event stream, wired together.

use std::sync::Arc;

use hibi_types::Task;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, Apis, HttpStore};
use crate::cache::CacheSet;
use crate::config::ClientConfig;
use crate::mutation::MutationCoordinator;
use crate::notice::Notices;
use crate::refetch::Refetcher;
use crate::stream::{ConnectionStatus, EventSource, HttpEventSource, StreamClient};
use crate::undo::UndoSurface;

/// Entry point for a UI. Operations live in [`ops`](crate::ops).
pub struct Session {
    pub(crate) apis: Apis,
    pub(crate) caches: CacheSet,
    pub(crate) coordinator: MutationCoordinator,
    pub(crate) undo: UndoSurface<Task>,
    notices: Notices,
    refetcher: Refetcher,
    stream: Mutex<Option<StreamClient>>,
    cancel: CancellationToken,
    config: ClientConfig,
}

impl Session {
    /// Build a session over `apis`. Spawns the refetcher, so this must run
    /// inside a tokio runtime. No event stream until
    /// [`start_stream`](Self::start_stream).
    pub fn new(apis: Apis, config: ClientConfig) -> Self {
        let (caches, requests) = CacheSet::new(config.max_age());
        let notices = Notices::new();
        let cancel = CancellationToken::new();

        let refetcher = Refetcher::new(apis.clone(), caches.clone(), cancel.child_token());
        refetcher.clone().spawn(requests);

        Self {
            coordinator: MutationCoordinator::new(notices.clone()),
            undo: UndoSurface::new(config.undo_window()),
            apis,
            caches,
            notices,
            refetcher,
            stream: Mutex::new(None),
            cancel,
            config,
        }
    }

    /// HTTP store plus HTTP event stream against `config.base_url`.
    pub fn connect(config: ClientConfig) -> Result<Self, ApiError> {
        // One pool for both; the stream must not inherit a request timeout,
        // so timeouts are set per store request instead.
        let client = reqwest::Client::builder().build()?;
        let store = HttpStore::with_client(client.clone(), config.base_url.clone(), config.request_timeout());
        let source = HttpEventSource::new(client, &config.base_url);

        tracing::info!(base_url = %config.base_url, "connecting session");
        let session = Self::new(Apis::from_backend(Arc::new(store)), config);
        session.start_stream(Arc::new(source));
        Ok(session)
    }

    /// Start (or replace) the session's event stream.
    pub fn start_stream(&self, source: Arc<dyn EventSource>) -> broadcast::Receiver<ConnectionStatus> {
        let client = StreamClient::spawn(
            source,
            self.caches.clone(),
            self.config.reconnect_delay(),
            self.config.stream_idle_timeout(),
        );
        let status = client.subscribe_status();
        if let Some(previous) = self.stream.lock().replace(client) {
            previous.close();
        }
        status
    }

    /// Close the event stream, if any. Caches keep working on max-age alone.
    pub fn stop_stream(&self) {
        if let Some(stream) = self.stream.lock().take() {
            stream.close();
        }
    }

    pub fn has_stream(&self) -> bool {
        self.stream.lock().as_ref().is_some_and(|s| !s.is_finished())
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn undo_surface(&self) -> &UndoSurface<Task> {
        &self.undo
    }

    pub fn coordinator(&self) -> &MutationCoordinator {
        &self.coordinator
    }

    pub fn refetcher(&self) -> &Refetcher {
        &self.refetcher
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Stop the stream and the refetcher. Pending undo timers run out on
    /// their own.
    pub fn shutdown(&self) {
        self.stop_stream();
        self.cancel.cancel();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
