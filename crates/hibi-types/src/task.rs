//! Tasks, subtasks, and their create/update bodies.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::EntityId;
use crate::key::{CacheScope, Filter};
use crate::kind::EntityKind;
use crate::record::{Record, ValidationError, check_len, require_text, text_matches, year_of};

const MAX_TITLE: usize = 500;
const MAX_DESCRIPTION: usize = 10_000;

/// Workflow status of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum TaskStatus {
    #[default]
    Todo,
    #[strum(serialize = "in_progress", serialize = "doing")]
    InProgress,
    #[strum(serialize = "done", serialize = "completed")]
    Done,
}

impl TaskStatus {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checklist item inside a task. Ids are only unique within the parent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    /// ISO date (`YYYY-MM-DD`), opaque to the sync layer.
    #[serde(default)]
    pub due_date: Option<String>,
    /// Label ids.
    #[serde(default)]
    pub labels: Vec<EntityId>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub archived: bool,
    /// Explicit order in the active list; lower comes first.
    #[serde(default)]
    pub position: i64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Task {
    pub fn subtask(&self, subtask_id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == subtask_id)
    }

    /// Set a subtask's completion. Returns false if the subtask is unknown.
    pub fn set_subtask_completed(&mut self, subtask_id: &str, completed: bool, now: u64) -> bool {
        match self.subtasks.iter_mut().find(|s| s.id == subtask_id) {
            Some(sub) => {
                sub.completed = completed;
                self.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Position that places a new task at the head of `active`.
    pub fn head_position(active: &[Task]) -> i64 {
        active.iter().map(|t| t.position).min().map_or(0, |min| min - 1)
    }

    /// Rewrite positions so `ordered_ids` come first, in that order, followed
    /// by any tasks not named (keeping their relative order). Returns the
    /// re-sorted list.
    pub fn reordered(mut active: Vec<Task>, ordered_ids: &[EntityId], now: u64) -> Vec<Task> {
        let rank = |t: &Task| ordered_ids.iter().position(|id| id == &t.id);
        active.sort_by(|a, b| match (rank(a), rank(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Task::compare(CacheScope::Tasks, a, b),
        });
        for (i, task) in active.iter_mut().enumerate() {
            let position = i as i64;
            if task.position != position {
                task.position = position;
                task.updated_at = now;
            }
        }
        active
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub labels: Vec<EntityId>,
    /// Subtask titles; ids are assigned on creation.
    #[serde(default)]
    pub subtasks: Vec<String>,
}

impl TaskInput {
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::nullable::deserialize"
    )]
    pub due_date: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self { status: Some(status), ..Default::default() }
    }

    pub fn priority(priority: Priority) -> Self {
        Self { priority: Some(priority), ..Default::default() }
    }

    pub fn archived(archived: bool) -> Self {
        Self { archived: Some(archived), ..Default::default() }
    }
}

impl Record for Task {
    const KIND: EntityKind = EntityKind::Todos;
    type Input = TaskInput;
    type Patch = TaskPatch;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn created_at(&self) -> u64 {
        self.created_at
    }

    fn compare(scope: CacheScope, a: &Self, b: &Self) -> Ordering {
        let newest_first = b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id));
        match scope {
            CacheScope::Tasks => a.position.cmp(&b.position).then(newest_first),
            _ => newest_first,
        }
    }

    fn in_scope(&self, scope: CacheScope) -> bool {
        match scope {
            CacheScope::Tasks => !self.archived,
            CacheScope::ArchivedTasks => self.archived,
            _ => false,
        }
    }

    fn matches(&self, filter: &Filter) -> bool {
        if filter.year.is_some_and(|year| year_of(self.created_at) != Some(year)) {
            return false;
        }
        match &filter.search {
            Some(term) => text_matches(
                term,
                std::iter::once(self.title.as_str()).chain(self.description.as_deref()),
            ),
            None => true,
        }
    }

    fn from_input(id: EntityId, input: TaskInput, now: u64) -> Self {
        let subtasks = input
            .subtasks
            .into_iter()
            .enumerate()
            .map(|(i, title)| Subtask { id: format!("s{}", i + 1), title, completed: false })
            .collect();
        Self {
            id,
            title: input.title.trim().to_string(),
            description: input.description,
            status: input.status,
            priority: input.priority,
            due_date: input.due_date,
            labels: input.labels,
            subtasks,
            archived: false,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply_patch(&mut self, patch: &TaskPatch, now: u64) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(due_date) = &patch.due_date {
            self.due_date = due_date.clone();
        }
        if let Some(labels) = &patch.labels {
            self.labels = labels.clone();
        }
        if let Some(archived) = patch.archived {
            self.archived = archived;
        }
        self.updated_at = now;
    }

    fn validate_input(input: &TaskInput) -> Result<(), ValidationError> {
        require_text("title", &input.title, MAX_TITLE)?;
        if let Some(description) = &input.description {
            check_len("description", description, MAX_DESCRIPTION)?;
        }
        for title in &input.subtasks {
            require_text("subtask title", title, MAX_TITLE)?;
        }
        Ok(())
    }

    fn validate_patch(patch: &TaskPatch) -> Result<(), ValidationError> {
        if let Some(title) = &patch.title {
            require_text("title", title, MAX_TITLE)?;
        }
        if let Some(Some(description)) = &patch.description {
            check_len("description", description, MAX_DESCRIPTION)?;
        }
        Ok(())
    }
}
