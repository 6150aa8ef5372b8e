//! hibi client sync layer
//!
//! Keeps a local, typed cache of server collections consistent with the
//! server while letting the UI update instantly:
//!
//! - **[`cache`]**: per-key confirmed values plus optimistic layers; views
//!   mount keys and are refetched when stale or older than the max age.
//! - **[`mutation`]**: optimistic apply → server call → commit or atomic
//!   rollback with an error notice.
//! - **[`stream`]**: one event-stream connection per session; change
//!   signals invalidate scopes through the [`routing`] table; fixed-delay
//!   reconnect.
//! - **[`undo`]**: time-boxed tokens that restore an archived task.
//!
//! ```text
//!   UI ──ops──▶ MutationCoordinator ──▶ EntityCache ◀── Refetcher ◀── HttpStore
//!                      │                    ▲
//!                      ▼                    │ invalidate
//!                 HttpStore          StreamClient ◀── GET /api/events
//! ```
//!
//! [`Session`] wires all of it together.

pub mod api;
pub mod cache;
pub mod config;
pub mod constants;
pub mod mutation;
pub mod notice;
pub mod ops;
pub mod refetch;
pub mod routing;
pub mod session;
pub mod sse;
pub mod stream;
pub mod undo;

pub use api::{ApiError, Apis, EntityApi, HttpStore, TaskApi};
pub use cache::{CacheSet, CacheView, EntityCache, MutationId, Transform};
pub use config::ClientConfig;
pub use mutation::{MutationCoordinator, MutationError, MutationOutcome, MutationPlan, Pending};
pub use notice::{Notice, NoticeLevel, Notices};
pub use ops::Archived;
pub use refetch::Refetcher;
pub use routing::{ROUTES, Route, scopes_for};
pub use session::Session;
pub use sse::{SseDecoder, SseEvent, SseFrame};
pub use stream::{
    ConnectionStatus, EventSource, FrameStream, HttpEventSource, StreamClient, StreamError,
    StreamMachine, StreamState,
};
pub use undo::{UndoError, UndoEvent, UndoSurface, UndoToken};
