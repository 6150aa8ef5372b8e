//! People (contacts).

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::key::{CacheScope, Filter};
use crate::kind::EntityKind;
use crate::record::{Record, ValidationError, check_len, require_text, text_matches, year_of};

const MAX_NAME: usize = 200;
const MAX_NOTES: usize = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// ISO date (`YYYY-MM-DD`).
    #[serde(default)]
    pub birthday: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonInput {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
}

impl PersonInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub email: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub phone: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub notes: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub birthday: Option<Option<String>>,
}

impl Record for Person {
    const KIND: EntityKind = EntityKind::People;
    type Input = PersonInput;
    type Patch = PersonPatch;

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
        scope == CacheScope::People
    }

    fn matches(&self, filter: &Filter) -> bool {
        if filter.year.is_some_and(|year| year_of(self.created_at) != Some(year)) {
            return false;
        }
        match &filter.search {
            Some(term) => text_matches(
                term,
                std::iter::once(self.name.as_str())
                    .chain(self.email.as_deref())
                    .chain(self.notes.as_deref()),
            ),
            None => true,
        }
    }

    fn from_input(id: EntityId, input: PersonInput, now: u64) -> Self {
        Self {
            id,
            name: input.name.trim().to_string(),
            email: input.email,
            phone: input.phone,
            notes: input.notes,
            birthday: input.birthday,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &PersonPatch, now: u64) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = &patch.email {
            self.email = email.clone();
        }
        if let Some(phone) = &patch.phone {
            self.phone = phone.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(birthday) = &patch.birthday {
            self.birthday = birthday.clone();
        }
        self.updated_at = now;
    }

    fn validate_input(input: &PersonInput) -> Result<(), ValidationError> {
        require_text("name", &input.name, MAX_NAME)?;
        if let Some(email) = &input.email {
            validate_email(email)?;
        }
        if let Some(notes) = &input.notes {
            check_len("notes", notes, MAX_NOTES)?;
        }
        Ok(())
    }

    fn validate_patch(patch: &PersonPatch) -> Result<(), ValidationError> {
        if let Some(name) = &patch.name {
            require_text("name", name, MAX_NAME)?;
        }
        if let Some(Some(email)) = &patch.email {
            validate_email(email)?;
        }
        if let Some(Some(notes)) = &patch.notes {
            check_len("notes", notes, MAX_NOTES)?;
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Ok(());
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::Invalid { field: "email", reason: format!("'{email}' is not an address") }),
    }
}
