//! Opaque entity identifiers.
//!
//! Ids are strings on the wire and in storage. Generated ids are a kind prefix
//! (`t_`, `p_`, `n_`, `l_`) followed by a UUIDv7 in simple hex form. Clients
//! never parse them; they only compare.
//!
//! Optimistic creates use a provisional `tmp_` id until the server answers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kind::EntityKind;

const PROVISIONAL_PREFIX: &str = "tmp_";

/// A stable, immutable record identifier.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wrap an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh server-side identifier for `kind`.
    pub fn generate(kind: EntityKind) -> Self {
        Self(format!("{}_{}", kind.id_prefix(), uuid::Uuid::now_v7().as_simple()))
    }

    /// Generate a client-local placeholder id for an optimistic create.
    pub fn provisional() -> Self {
        Self(format!("{PROVISIONAL_PREFIX}{}", uuid::Uuid::now_v7().as_simple()))
    }

    /// Whether this id was minted locally and never seen by the server.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
