//! `GET /api/events`: change signals as server-sent events.
//!
//! Each connection registers one notifier listener. Frames are
//! `data: {"entity":"<kind>"}` per change plus a `: heartbeat` comment every
//! keep-alive period. When the client goes away hyper drops the body stream,
//! which drops the listener guard and the heartbeat timer with it.

use std::convert::Infallible;

use axum::extract::State;
use axum::http::{HeaderName, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use tokio::time::{Instant, interval_at};
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::IntervalStream;

use crate::routes::AppState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

pub async fn stream_events(State(state): State<AppState>) -> impl IntoResponse {
    let signals = state.notifier.listen();
    tracing::info!(listeners = state.notifier.listener_count(), "event stream opened");

    let period = state.keepalive;
    let heartbeat = IntervalStream::new(interval_at(Instant::now() + period, period))
        .map(|_| Event::default().comment("heartbeat"));
    let changes = signals.map(|signal| Event::default().data(signal.to_json()));
    let stream = changes.merge(heartbeat).map(Ok::<_, Infallible>);

    let headers = [
        (header::CACHE_CONTROL, "no-cache, no-transform"),
        (header::CONNECTION, "keep-alive"),
        (X_ACCEL_BUFFERING, "no"),
    ];
    (headers, Sse::new(stream))
}
