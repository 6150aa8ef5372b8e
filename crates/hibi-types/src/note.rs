//! Notebook notes.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::key::{CacheScope, Filter};
use crate::kind::EntityKind;
use crate::record::{Record, ValidationError, check_len, text_matches, year_of};

const MAX_TITLE: usize = 500;
const MAX_CONTENT: usize = 200_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: EntityId,
    #[serde(default)]
    pub title: String,
    /// Markdown source; rendering is not our concern.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteInput {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl NotePatch {
    pub fn pinned(pinned: bool) -> Self {
        Self { pinned: Some(pinned), ..Default::default() }
    }
}

impl Record for Note {
    const KIND: EntityKind = EntityKind::NotebookNotes;
    type Input = NoteInput;
    type Patch = NotePatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Pinned first, then most recently updated.
    fn compare(_scope: CacheScope, a: &Self, b: &Self) -> Ordering {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| b.id.cmp(&a.id))
    }

    fn in_scope(&self, scope: CacheScope) -> bool {
        scope == CacheScope::NotebookNotes
    }

    fn matches(&self, filter: &Filter) -> bool {
        if filter.year.is_some_and(|year| year_of(self.created_at) != Some(year)) {
            return false;
        }
        match &filter.search {
            Some(term) => text_matches(term, [self.title.as_str(), self.content.as_str()]),
            None => true,
        }
    }

    fn from_input(id: EntityId, input: NoteInput, now: u64) -> Self {
        Self {
            id,
            title: input.title,
            content: input.content,
            pinned: input.pinned,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &NotePatch, now: u64) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(pinned) = patch.pinned {
            self.pinned = pinned;
        }
        self.updated_at = now;
    }

    fn validate_input(input: &NoteInput) -> Result<(), ValidationError> {
        check_len("title", &input.title, MAX_TITLE)?;
        check_len("content", &input.content, MAX_CONTENT)
    }

    fn validate_patch(patch: &NotePatch) -> Result<(), ValidationError> {
        if let Some(title) = &patch.title {
            check_len("title", title, MAX_TITLE)?;
        }
        if let Some(content) = &patch.content {
            check_len("content", content, MAX_CONTENT)?;
        }
        Ok(())
    }
}
