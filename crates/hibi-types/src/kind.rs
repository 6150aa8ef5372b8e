//! Entity kinds: the granularity of change signals.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

/// A category of domain record.
///
/// The string form is what travels in a [`ChangeSignal`](crate::ChangeSignal)
/// frame. Invalidation is kind-granular: a signal never names a record.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, EnumIter,
)]
pub enum EntityKind {
    #[serde(rename = "todos")]
    #[strum(serialize = "todos")]
    Todos,
    #[serde(rename = "people")]
    #[strum(serialize = "people")]
    People,
    #[serde(rename = "notebook-notes")]
    #[strum(serialize = "notebook-notes")]
    NotebookNotes,
    #[serde(rename = "labels")]
    #[strum(serialize = "labels")]
    Labels,
}

impl EntityKind {
    /// Parse a wire kind. Unknown kinds are `None`, never an error.
    pub fn parse(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Todos => "todos",
            EntityKind::People => "people",
            EntityKind::NotebookNotes => "notebook-notes",
            EntityKind::Labels => "labels",
        }
    }

    /// Prefix for generated ids.
    pub(crate) fn id_prefix(&self) -> &'static str {
        match self {
            EntityKind::Todos => "t",
            EntityKind::People => "p",
            EntityKind::NotebookNotes => "n",
            EntityKind::Labels => "l",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_parse_matches_as_str() {
        for kind in EntityKind::iter() {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_kind_is_none() {
        assert_eq!(EntityKind::parse("widgets"), None);
        assert_eq!(EntityKind::parse(""), None);
        assert_eq!(EntityKind::parse("TODOS"), None);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&EntityKind::NotebookNotes).unwrap(), "\"notebook-notes\"");
        let k: EntityKind = serde_json::from_str("\"todos\"").unwrap();
        assert_eq!(k, EntityKind::Todos);
    }
}
