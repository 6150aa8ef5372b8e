//! Invalidation routing: which cache scopes a change signal for each kind
//! makes stale.
//!
//! One line per kind. Labels appear on tasks, archived ones included, so a
//! label change also stales both task lists.

use hibi_types::{CacheScope, ChangeSignal, EntityKind};

pub const ROUTES: &[(EntityKind, &[CacheScope])] = &[
    (EntityKind::Todos, &[CacheScope::Tasks, CacheScope::ArchivedTasks]),
    (EntityKind::People, &[CacheScope::People]),
    (EntityKind::NotebookNotes, &[CacheScope::NotebookNotes]),
    (EntityKind::Labels, &[CacheScope::Labels, CacheScope::Tasks, CacheScope::ArchivedTasks]),
];

/// Scopes a signal for `kind` invalidates.
pub fn scopes_for(kind: EntityKind) -> &'static [CacheScope] {
    ROUTES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, scopes)| *scopes)
        .unwrap_or(&[])
}

/// What to do with one `data:` payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Invalidate(EntityKind, &'static [CacheScope]),
    /// Not a change signal.
    Malformed,
    /// A well-formed signal naming a kind this client does not know.
    Unknown(String),
}

pub fn route(data: &str) -> Route {
    let signal = match ChangeSignal::from_json(data) {
        Ok(signal) => signal,
        Err(_) => return Route::Malformed,
    };
    match signal.kind() {
        Some(kind) => Route::Invalidate(kind, scopes_for(kind)),
        None => Route::Unknown(signal.entity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_a_route() {
        for kind in [EntityKind::Todos, EntityKind::People, EntityKind::NotebookNotes, EntityKind::Labels] {
            assert!(!scopes_for(kind).is_empty(), "{kind} has no route");
        }
    }

    #[test]
    fn test_todos_invalidates_active_and_archived() {
        assert_eq!(
            route(r#"{"entity":"todos"}"#),
            Route::Invalidate(EntityKind::Todos, &[CacheScope::Tasks, CacheScope::ArchivedTasks])
        );
    }

    #[test]
    fn test_labels_invalidate_both_task_lists() {
        assert_eq!(
            scopes_for(EntityKind::Labels),
            &[CacheScope::Labels, CacheScope::Tasks, CacheScope::ArchivedTasks]
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(route(r#"{"entity":"calendar"}"#), Route::Unknown("calendar".into()));
        assert_eq!(route("not json"), Route::Malformed);
        assert_eq!(route(r#"{"kind":"todos"}"#), Route::Malformed);
    }
}
