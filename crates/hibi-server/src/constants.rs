//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default HTTP port for the hibi server.
pub const DEFAULT_PORT: u16 = 4780;

/// Default bind address (localhost only for security).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Database file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "hibi.db";

/// Interval between `: heartbeat` comments on an open event stream.
pub const SSE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `database` value that selects the in-memory store.
pub const MEMORY_DATABASE: &str = ":memory:";
