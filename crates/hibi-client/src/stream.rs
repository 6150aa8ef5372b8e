//! Stream Client: keeps one event-stream connection open per session and
//! turns change signals into cache invalidations.
//!
//! ```text
//!              on_open                 on_error (once)
//!  Connecting ────────▶ Open ────────────────────────▶ Error
//!      ▲                                                  │
//!      └──────────── poll_reconnect (after delay) ────────┘
//!
//!  close() from any state ──▶ Closed
//! ```
//!
//! [`StreamMachine`] is the sans-IO state machine; [`StreamClient::spawn`]
//! drives it over an [`EventSource`] on a tokio task. The push channel is
//! treated as unreliable: a lost signal only delays freshness until the next
//! signal, max-age refetch, or mutation.
//!
//! The server sends a heartbeat comment every 30 seconds. A connection that
//! yields no frame for the idle timeout is presumed dead (a half-open socket
//! never reports an error) and goes through the same reconnect path as a
//! read failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::CacheSet;
use crate::constants::{EVENTS_PATH, STATUS_CHANNEL_CAPACITY};
use crate::routing::{self, Route};
use crate::sse::{SseDecoder, SseFrame};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("event stream returned status {0}")]
    Status(u16),
    #[error("read failed: {0}")]
    Read(String),
    #[error("no data for {0:?}")]
    Idle(Duration),
}

/// Connection lifecycle status, for diagnostics. Never shown to users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Error(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Connecting,
    Open,
    Error,
    Closed,
}

/// Sans-IO connection state.
#[derive(Debug)]
pub struct StreamMachine {
    state: StreamState,
    reconnect_at: Option<Instant>,
    delay: Duration,
    attempts: u32,
}

impl StreamMachine {
    pub fn new(delay: Duration) -> Self {
        Self { state: StreamState::Connecting, reconnect_at: None, delay, attempts: 0 }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// When the pending reconnect fires, if one is scheduled.
    pub fn reconnect_at(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Reconnects scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_open(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Open;
        self.reconnect_at = None;
        self.attempts = 0;
    }

    /// Route one `data:` payload. `None` once closed.
    pub fn on_message(&self, data: &str) -> Option<Route> {
        if self.state == StreamState::Closed {
            return None;
        }
        Some(routing::route(data))
    }

    /// Schedule a reconnect. Returns false (and schedules nothing) if one is
    /// already pending or the machine is closed.
    pub fn on_error(&mut self, now: Instant) -> bool {
        if self.state == StreamState::Closed || self.reconnect_at.is_some() {
            return false;
        }
        self.state = StreamState::Error;
        self.reconnect_at = Some(now + self.delay);
        self.attempts += 1;
        true
    }

    /// Move to `Connecting` if the reconnect deadline has passed.
    pub fn poll_reconnect(&mut self, now: Instant) -> bool {
        match self.reconnect_at {
            Some(at) if self.state == StreamState::Error && now >= at => {
                self.reconnect_at = None;
                self.state = StreamState::Connecting;
                true
            }
            _ => false,
        }
    }

    /// Tear down. Cancels any pending reconnect.
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
        self.reconnect_at = None;
    }
}

pub type FrameStream = BoxStream<'static, Result<SseFrame, StreamError>>;

/// Opens one event-stream connection.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<FrameStream, StreamError>;
}

/// [`EventSource`] over `GET /api/events`.
#[derive(Clone, Debug)]
pub struct HttpEventSource {
    client: reqwest::Client,
    url: String,
}

impl HttpEventSource {
    /// The client must not carry a total request timeout; the stream is
    /// expected to stay open indefinitely.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        let url = format!("{}{}", base_url.trim_end_matches('/'), EVENTS_PATH);
        Self { client, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<FrameStream, StreamError> {
        let mut req = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in hibi_telemetry::inject_trace_headers() {
            req = req.header(name, value);
        }

        let resp = req.send().await.map_err(|e| StreamError::Connect(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StreamError::Status(resp.status().as_u16()));
        }

        let mut decoder = SseDecoder::new();
        let frames = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect::<Vec<_>>(),
                Err(e) => vec![Err(StreamError::Read(e.to_string()))],
            })
            .flat_map(futures::stream::iter);
        Ok(frames.boxed())
    }
}

/// Handle to a running stream driver. Dropping it tears the stream down.
pub struct StreamClient {
    cancel: CancellationToken,
    status: broadcast::Sender<ConnectionStatus>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl StreamClient {
    /// Start driving `source`, invalidating `caches` on every signal. An open
    /// connection silent for `idle_timeout` is dropped and reconnected.
    pub fn spawn(
        source: Arc<dyn EventSource>,
        caches: CacheSet,
        reconnect_delay: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (status, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let task = tokio::spawn(drive(
            source,
            caches,
            StreamMachine::new(reconnect_delay),
            idle_timeout,
            status.clone(),
            cancel.clone(),
        ));
        Self { cancel, status, task: Some(task) }
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Close the connection and cancel any pending reconnect.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Close and wait for the driver to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Next {
    Frame(Option<Result<SseFrame, StreamError>>),
    Cancelled,
}

async fn drive(
    source: Arc<dyn EventSource>,
    caches: CacheSet,
    mut machine: StreamMachine,
    idle_timeout: Duration,
    status: broadcast::Sender<ConnectionStatus>,
    cancel: CancellationToken,
) {
    'session: loop {
        let span = tracing::info_span!("stream.connect", attempt = machine.attempts());
        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            r = source.connect().instrument(span) => r,
        };

        match connected {
            Ok(mut frames) => {
                machine.on_open();
                tracing::info!("event stream open");
                let _ = status.send(ConnectionStatus::Connected);

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => Next::Cancelled,
                        f = tokio::time::timeout(idle_timeout, frames.next()) => match f {
                            Ok(f) => Next::Frame(f),
                            Err(_) => Next::Frame(Some(Err(StreamError::Idle(idle_timeout)))),
                        },
                    };
                    match next {
                        Next::Cancelled => break 'session,
                        Next::Frame(Some(Ok(SseFrame::Event(event)))) => {
                            apply_signal(&machine, &caches, &event.data)
                        }
                        Next::Frame(Some(Ok(SseFrame::Comment(_)))) => tracing::trace!("heartbeat"),
                        Next::Frame(Some(Err(e))) => {
                            tracing::warn!(error = %e, "event stream failed");
                            let _ = status.send(ConnectionStatus::Error(e.to_string()));
                            break;
                        }
                        Next::Frame(None) => {
                            tracing::info!("event stream ended");
                            let _ = status.send(ConnectionStatus::Disconnected);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "event stream connect failed");
                let _ = status.send(ConnectionStatus::Error(e.to_string()));
            }
        }

        machine.on_error(Instant::now());
        let Some(at) = machine.reconnect_at() else {
            break;
        };
        let _ = status.send(ConnectionStatus::Reconnecting { attempt: machine.attempts() });
        tokio::select! {
            _ = cancel.cancelled() => break 'session,
            _ = tokio::time::sleep_until(at) => {}
        }
        machine.poll_reconnect(Instant::now());
    }

    machine.close();
    tracing::debug!("event stream closed");
    let _ = status.send(ConnectionStatus::Disconnected);
}

fn apply_signal(machine: &StreamMachine, caches: &CacheSet, data: &str) {
    match machine.on_message(data) {
        Some(Route::Invalidate(kind, scopes)) => {
            let refetched: usize = scopes.iter().map(|scope| caches.invalidate(*scope)).sum();
            tracing::debug!(kind = %kind, refetched, "change signal");
        }
        Some(Route::Malformed) => tracing::debug!(data, "dropping malformed frame"),
        Some(Route::Unknown(kind)) => tracing::debug!(kind = %kind, "ignoring unknown entity kind"),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hibi_types::{CacheScope, EntityKind};

    const DELAY: Duration = Duration::from_secs(5);

    #[test]
    fn test_open_clears_pending_reconnect() {
        let mut m = StreamMachine::new(DELAY);
        let now = Instant::now();
        assert!(m.on_error(now));
        assert_eq!(m.state(), StreamState::Error);
        assert_eq!(m.reconnect_at(), Some(now + DELAY));

        m.on_open();
        assert_eq!(m.state(), StreamState::Open);
        assert_eq!(m.reconnect_at(), None);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn test_second_error_schedules_nothing() {
        let mut m = StreamMachine::new(DELAY);
        let now = Instant::now();
        assert!(m.on_error(now));
        assert!(!m.on_error(now + Duration::from_secs(1)));
        assert_eq!(m.reconnect_at(), Some(now + DELAY));
        assert_eq!(m.attempts(), 1);
    }

    #[test]
    fn test_reconnect_waits_for_delay() {
        let mut m = StreamMachine::new(DELAY);
        let now = Instant::now();
        m.on_error(now);
        assert!(!m.poll_reconnect(now + Duration::from_secs(4)));
        assert!(m.poll_reconnect(now + DELAY));
        assert_eq!(m.state(), StreamState::Connecting);
        assert!(!m.poll_reconnect(now + DELAY));

        // A fresh failure after reconnecting schedules again.
        assert!(m.on_error(now + DELAY));
        assert_eq!(m.attempts(), 2);
    }

    #[test]
    fn test_close_cancels_and_ignores_everything() {
        let mut m = StreamMachine::new(DELAY);
        let now = Instant::now();
        m.on_error(now);
        m.close();
        assert_eq!(m.reconnect_at(), None);
        assert!(!m.on_error(now));
        assert!(!m.poll_reconnect(now + DELAY));
        m.on_open();
        assert_eq!(m.state(), StreamState::Closed);
        assert_eq!(m.on_message(r#"{"entity":"todos"}"#), None);
    }

    #[test]
    fn test_messages_route() {
        let m = StreamMachine::new(DELAY);
        assert_eq!(
            m.on_message(r#"{"entity":"people"}"#),
            Some(Route::Invalidate(EntityKind::People, &[CacheScope::People]))
        );
    }

    #[test]
    fn test_http_source_url() {
        let source = HttpEventSource::new(reqwest::Client::new(), "http://127.0.0.1:4780/");
        assert_eq!(source.url(), "http://127.0.0.1:4780/api/events");
    }
}
