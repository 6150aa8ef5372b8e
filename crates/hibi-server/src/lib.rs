//! hibi server library
//!
//! REST + server-sent events backend: a SQLite entity store behind axum
//! handlers, and a change notifier that fans every successful write out to
//! connected event streams.

pub mod config;
pub mod constants;
pub mod events;
pub mod notifier;
pub mod routes;
pub mod store;

pub use config::{ConfigError, ConfigOverrides, ServerConfig};
pub use notifier::{ChangeNotifier, SignalStream, Unsubscribe};
pub use routes::{AppState, HttpError, router};
pub use store::{Store, StoreError};

use tokio::net::TcpListener;

/// Serve the API on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "hibi server listening");
    }
    axum::serve(listener, router(state)).await
}

/// Open the store named by `config` (in memory when unset).
pub fn open_store(config: &ServerConfig) -> Result<Store, StoreError> {
    match &config.database {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::warn!(path = %parent.display(), error = %e, "could not create data directory");
                }
            }
            tracing::info!(path = %path.display(), "opening store");
            Store::open(path)
        }
        None => {
            tracing::info!("using in-memory store");
            Store::in_memory()
        }
    }
}
