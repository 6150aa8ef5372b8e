//! The [`Record`] trait and order-preserving list helpers.
//!
//! Every cached entity type implements `Record`. The same `apply_patch` runs
//! on the server (to produce the authoritative record) and on the client (to
//! predict it optimistically), so a successful optimistic update matches the
//! server's answer field for field.

use std::cmp::Ordering;
use std::fmt::Debug;

use chrono::{DateTime, Datelike};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::ids::EntityId;
use crate::key::{CacheScope, Filter};
use crate::kind::EntityKind;

/// Input rejected before it reaches the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Behaviour shared by every entity type.
pub trait Record:
    Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The kind named in change signals for this type.
    const KIND: EntityKind;

    /// Body of a create request.
    type Input: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Body of an update request. Absent fields are left unchanged.
    type Patch: Clone + Debug + Default + Send + Sync + Serialize + DeserializeOwned + 'static;

    fn id(&self) -> &EntityId;

    fn created_at(&self) -> u64;

    /// Order policy of `scope`.
    fn compare(scope: CacheScope, a: &Self, b: &Self) -> Ordering;

    /// Whether this record belongs in `scope` at all (e.g. archived tasks).
    fn in_scope(&self, _scope: CacheScope) -> bool {
        true
    }

    /// Whether this record passes `filter`.
    fn matches(&self, filter: &Filter) -> bool;

    /// Build a new record from create input.
    fn from_input(id: EntityId, input: Self::Input, now: u64) -> Self;

    /// Apply an update in place, bumping the updated timestamp.
    fn apply_patch(&mut self, patch: &Self::Patch, now: u64);

    fn validate_input(input: &Self::Input) -> Result<(), ValidationError>;

    fn validate_patch(patch: &Self::Patch) -> Result<(), ValidationError>;
}

/// Sort `items` by the order policy of `scope`. Stable.
pub fn sort_for<T: Record>(scope: CacheScope, items: &mut [T]) {
    items.sort_by(|a, b| T::compare(scope, a, b));
}

/// Insert or fully replace `record`, keeping `scope` order.
pub fn upsert_sorted<T: Record>(scope: CacheScope, mut items: Vec<T>, record: T) -> Vec<T> {
    items.retain(|r| r.id() != record.id());
    items.push(record);
    sort_for(scope, &mut items);
    items
}

/// Fully replace the record with the same id, if present, keeping `scope`
/// order. Absent records are not inserted.
pub fn replace_by_id<T: Record>(scope: CacheScope, mut items: Vec<T>, record: &T) -> Vec<T> {
    let mut found = false;
    for item in items.iter_mut() {
        if item.id() == record.id() {
            *item = record.clone();
            found = true;
        }
    }
    if found {
        sort_for(scope, &mut items);
    }
    items
}

pub fn remove_by_id<T: Record>(mut items: Vec<T>, id: &EntityId) -> Vec<T> {
    items.retain(|r| r.id() != id);
    items
}

/// Validate a required, bounded text field.
pub(crate) fn require_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    check_len(field, value, max)
}

pub(crate) fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Case-insensitive substring search over the given haystacks.
pub(crate) fn text_matches<'a>(needle: &str, haystacks: impl IntoIterator<Item = &'a str>) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    haystacks.into_iter().any(|h| h.to_lowercase().contains(&needle))
}

/// Calendar year (UTC) of a Unix-millisecond timestamp. `None` past
/// chrono's representable range.
pub(crate) fn year_of(millis: u64) -> Option<i32> {
    let millis = i64::try_from(millis).ok()?;
    DateTime::from_timestamp_millis(millis).map(|d| d.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_of() {
        assert_eq!(year_of(0), Some(1970));
        // 2024-02-29T12:00:00Z
        assert_eq!(year_of(1_709_208_000_000), Some(2024));
        // 2024-12-31T23:59:59.999Z
        assert_eq!(year_of(1_735_689_599_999), Some(2024));
        // 2025-01-01T00:00:00Z
        assert_eq!(year_of(1_735_689_600_000), Some(2025));
        assert_eq!(year_of(u64::MAX), None);
    }

    #[test]
    fn test_text_matches() {
        assert!(text_matches("SHIP", ["Ship release"]));
        assert!(text_matches("", ["anything"]));
        assert!(!text_matches("deploy", ["Ship release", "notes"]));
        assert!(text_matches("note", ["Ship release", "some notes"]));
    }

    #[test]
    fn test_require_text() {
        assert_eq!(require_text("title", "  ", 10), Err(ValidationError::Empty("title")));
        assert_eq!(
            require_text("title", "abcdefghijk", 10),
            Err(ValidationError::TooLong { field: "title", max: 10 })
        );
        assert!(require_text("title", "ok", 10).is_ok());
    }
}
