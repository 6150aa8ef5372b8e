//! The change signal pushed over the event stream.
//!
//! A signal names only an entity *kind*. It carries no record id and no
//! payload; receivers refetch. The `entity` field stays a plain string on the
//! wire so a client built before a new kind existed can still decode the frame
//! and ignore it.

use serde::{Deserialize, Serialize};

use crate::kind::EntityKind;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSignal {
    pub entity: String,
}

impl ChangeSignal {
    pub fn new(kind: EntityKind) -> Self {
        Self { entity: kind.as_str().to_string() }
    }

    /// The known kind this signal names, if any.
    pub fn kind(&self) -> Option<EntityKind> {
        EntityKind::parse(&self.entity)
    }

    /// JSON body for an SSE `data:` line.
    pub fn to_json(&self) -> String {
        // A struct with one String field always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"entity\":\"{}\"}}", self.entity))
    }

    /// Parse an SSE `data:` payload.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

impl From<EntityKind> for ChangeSignal {
    fn from(kind: EntityKind) -> Self {
        Self::new(kind)
    }
}
