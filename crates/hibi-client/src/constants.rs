//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default server base URL for local development.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4780";

/// Path of the server-sent event stream.
pub const EVENTS_PATH: &str = "/api/events";

/// Cached data older than this is refetched when a view (re)subscribes.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

/// Fixed delay before reconnecting a failed event stream. No backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// An open event stream that yields nothing for this long is dropped and
/// reconnected. Twice the server's heartbeat interval.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How long an undo token stays invocable.
pub const UNDO_WINDOW: Duration = Duration::from_secs(5);

/// Per-request timeout for REST calls. Not applied to the event stream.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the user-notice broadcast channel.
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the connection-status broadcast channel.
pub const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the undo-event broadcast channel.
pub const UNDO_CHANNEL_CAPACITY: usize = 32;
