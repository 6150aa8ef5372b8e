//! Cache keys: which collection, under which filter.
//!
//! A [`CacheKey`] is a [`CacheScope`] plus a [`Filter`]. Two keys with
//! different filters may hold overlapping records; the cache keeps them
//! independently instead of normalizing into one table.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kind::EntityKind;

/// The collection a cache entry holds. Each scope has one entity type and one
/// order policy (see [`Record::compare`](crate::Record::compare)).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheScope {
    /// Active (non-archived) tasks, in explicit position order.
    #[serde(rename = "tasks")]
    Tasks,
    /// Archived tasks, newest first.
    #[serde(rename = "tasks:archived")]
    ArchivedTasks,
    #[serde(rename = "people")]
    People,
    #[serde(rename = "notebook-notes")]
    NotebookNotes,
    #[serde(rename = "labels")]
    Labels,
}

impl CacheScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheScope::Tasks => "tasks",
            CacheScope::ArchivedTasks => "tasks:archived",
            CacheScope::People => "people",
            CacheScope::NotebookNotes => "notebook-notes",
            CacheScope::Labels => "labels",
        }
    }

    /// The entity kind stored under this scope.
    pub fn kind(&self) -> EntityKind {
        match self {
            CacheScope::Tasks | CacheScope::ArchivedTasks => EntityKind::Todos,
            CacheScope::People => EntityKind::People,
            CacheScope::NotebookNotes => EntityKind::NotebookNotes,
            CacheScope::Labels => EntityKind::Labels,
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional list filters. The default filter is "everything in scope".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl Filter {
    pub fn search(term: impl Into<String>) -> Self {
        Self { search: Some(term.into()), year: None }
    }

    pub fn year(year: i32) -> Self {
        Self { search: None, year: Some(year) }
    }

    pub fn is_unfiltered(&self) -> bool {
        self.search.is_none() && self.year.is_none()
    }

    /// Query-string pairs, in a stable order.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = &self.search {
            pairs.push(("search", search.clone()));
        }
        if let Some(year) = self.year {
            pairs.push(("year", year.to_string()));
        }
        pairs
    }
}

/// Address of one cached collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub scope: CacheScope,
    #[serde(default)]
    pub filter: Filter,
}

impl CacheKey {
    pub fn new(scope: CacheScope, filter: Filter) -> Self {
        Self { scope, filter }
    }

    /// Unfiltered key for `scope`.
    pub fn all(scope: CacheScope) -> Self {
        Self { scope, filter: Filter::default() }
    }

    pub fn tasks() -> Self {
        Self::all(CacheScope::Tasks)
    }

    pub fn archived_tasks() -> Self {
        Self::all(CacheScope::ArchivedTasks)
    }

    pub fn people() -> Self {
        Self::all(CacheScope::People)
    }

    pub fn notebook_notes() -> Self {
        Self::all(CacheScope::NotebookNotes)
    }

    pub fn labels() -> Self {
        Self::all(CacheScope::Labels)
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scope.as_str())?;
        let pairs = self.filter.query_pairs();
        for (i, (name, value)) in pairs.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(CacheKey::tasks().to_string(), "tasks");
        assert_eq!(CacheKey::archived_tasks().to_string(), "tasks:archived");
        let key = CacheKey::tasks().with_filter(Filter { search: Some("ship".into()), year: Some(2025) });
        assert_eq!(key.to_string(), "tasks?search=ship&year=2025");
    }

    #[test]
    fn test_filtered_keys_are_distinct() {
        let all = CacheKey::people();
        let searched = CacheKey::people().with_filter(Filter::search("ada"));
        assert_ne!(all, searched);
        assert_eq!(all.scope, searched.scope);
        assert!(all.filter.is_unfiltered());
        assert!(!searched.filter.is_unfiltered());
    }

    #[test]
    fn test_scope_kinds() {
        assert_eq!(CacheScope::Tasks.kind(), EntityKind::Todos);
        assert_eq!(CacheScope::ArchivedTasks.kind(), EntityKind::Todos);
        assert_eq!(CacheScope::NotebookNotes.kind(), EntityKind::NotebookNotes);
    }
}
