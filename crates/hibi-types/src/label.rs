//! Task labels.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::key::{CacheScope, Filter};
use crate::kind::EntityKind;
use crate::record::{Record, ValidationError, require_text, text_matches};

const MAX_NAME: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: EntityId,
    pub name: String,
    /// `#rrggbb`.
    pub color: String,
    pub created_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelInput {
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

fn default_color() -> String {
    "#6b7280".to_string()
}

fn validate_color(color: &str) -> Result<(), ValidationError> {
    let hex = color.strip_prefix('#').unwrap_or("");
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::Invalid { field: "color", reason: format!("'{color}' is not #rrggbb") })
    }
}

impl Record for Label {
    const KIND: EntityKind = EntityKind::Labels;
    type Input = LabelInput;
    type Patch = LabelPatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn compare(_scope: CacheScope, a: &Self, b: &Self) -> Ordering {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    }

    fn in_scope(&self, scope: CacheScope) -> bool {
        scope == CacheScope::Labels
    }

    fn matches(&self, filter: &Filter) -> bool {
        match &filter.search {
            Some(term) => text_matches(term, [self.name.as_str()]),
            None => true,
        }
    }

    fn from_input(id: EntityId, input: LabelInput, now: u64) -> Self {
        Self { id, name: input.name.trim().to_string(), color: input.color, created_at: now }
    }

    fn apply_patch(&mut self, patch: &LabelPatch, _now: u64) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
    }

    fn validate_input(input: &LabelInput) -> Result<(), ValidationError> {
        require_text("name", &input.name, MAX_NAME)?;
        validate_color(&input.color)
    }

    fn validate_patch(patch: &LabelPatch) -> Result<(), ValidationError> {
        if let Some(name) = &patch.name {
            require_text("name", name, MAX_NAME)?;
        }
        if let Some(color) = &patch.color {
            validate_color(color)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_color_applies() {
        let input: LabelInput = serde_json::from_str(r#"{"name":"work"}"#).unwrap();
        assert_eq!(input.color, "#6b7280");
        assert!(Label::validate_input(&input).is_ok());
    }

    #[test]
    fn test_bad_color_rejected() {
        let input = LabelInput { name: "work".into(), color: "red".into() };
        assert!(Label::validate_input(&input).is_err());
    }
}
