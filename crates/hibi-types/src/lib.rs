//! Shared entity types for hibi.
//!
//! This crate is the common vocabulary between the server and the client sync
//! layer: typed records, entity kinds, cache keys, and the change signal that
//! travels over the event stream. It has **no internal hibi dependencies**.
//!
//! # Key Types
//!
//! |--------------------|-----------------------------------------------|
//! | Type               | Purpose                                       |
//! |--------------------|-----------------------------------------------|
//! | [`EntityId`]       | Opaque, immutable record identifier           |
//! | [`EntityKind`]     | Invalidation granularity (`"todos"`, …)       |
//! | [`CacheScope`]     | Which collection a cache entry holds          |
//! | [`CacheKey`]       | Scope + filter, addresses one cache entry     |
//! | [`Record`]         | Behaviour shared by every entity type         |
//! | [`Task`]           | Task with subtasks, labels, archive flag      |
//! | [`Person`]         | Contact record                                |
//! | [`Note`]           | Notebook note                                 |
//! | [`Label`]          | Task label                                    |
//! | [`ChangeSignal`]   | `{"entity": kind}` push frame                 |
//! |--------------------|-----------------------------------------------|

pub mod ids;
pub mod key;
pub mod kind;
pub mod label;
pub mod note;
pub mod person;
pub mod record;
pub mod signal;
pub mod task;

mod nullable;

pub use ids::EntityId;
pub use key::{CacheKey, CacheScope, Filter};
pub use kind::EntityKind;
pub use label::{Label, LabelInput, LabelPatch};
pub use note::{Note, NoteInput, NotePatch};
pub use person::{Person, PersonInput, PersonPatch};
pub use record::{Record, ValidationError, remove_by_id, replace_by_id, sort_for, upsert_sorted};
pub use signal::ChangeSignal;
pub use task::{Priority, Subtask, Task, TaskInput, TaskPatch, TaskStatus};

/// Current time as Unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
