//! Entity operations, one per user action.
//!
//! Each builds a [`MutationPlan`] and runs it through the session's
//! coordinator. Updates patch records in place with the same
//! [`Record::apply_patch`] the server runs, so a committed update lands on
//! exactly what the user already sees.

use hibi_types::{
    CacheKey, CacheScope, EntityId, Label, LabelInput, Note, NoteInput, NotePatch, Person,
    PersonInput, PersonPatch, Record, Task, TaskInput, TaskPatch, now_millis, remove_by_id,
    sort_for, upsert_sorted,
};
use tracing::Instrument;

use crate::api::EntityApi;
use crate::cache::EntityCache;
use crate::mutation::{MutationOutcome, MutationPlan};
use crate::session::Session;
use crate::undo::{UndoError, UndoToken};

/// Result of [`Session::archive_task`]. The token is `None` when the task
/// was not in the cache, and revoked when the archive rolled back.
#[derive(Debug)]
pub struct Archived {
    pub outcome: MutationOutcome<Task>,
    pub token: Option<UndoToken>,
}

fn task_keys() -> [CacheKey; 2] {
    [CacheKey::tasks(), CacheKey::archived_tasks()]
}

/// Replace `record` wholesale in `scope`, or drop it if it no longer belongs.
fn place<T: Record>(scope: CacheScope, items: Vec<T>, record: &T) -> Vec<T> {
    if record.in_scope(scope) {
        upsert_sorted(scope, items, record.clone())
    } else {
        remove_by_id(items, record.id())
    }
}

/// Patch `id` where it is, or insert `predicted` if it is moving in.
fn patched<T: Record>(
    scope: CacheScope,
    mut items: Vec<T>,
    id: &EntityId,
    patch: &T::Patch,
    predicted: Option<&T>,
    now: u64,
) -> Vec<T> {
    let mut found = false;
    for item in items.iter_mut().filter(|r| r.id() == id) {
        item.apply_patch(patch, now);
        found = true;
    }
    if let (false, Some(record)) = (found, predicted) {
        items.push(record.clone());
    }
    items.retain(|r| r.in_scope(scope));
    sort_for(scope, &mut items);
    items
}

/// Optimistic plan for an update of `id` across `keys`. `base` overrides the
/// cached record as the starting point for a record moving between scopes.
fn update_plan<T: Record>(
    cache: &EntityCache<T>,
    keys: &[CacheKey],
    label: &str,
    id: &EntityId,
    patch: &T::Patch,
    base: Option<T>,
) -> MutationPlan<T> {
    let now = now_millis();
    let predicted = base.or_else(|| cache.find(keys, id)).map(|mut record| {
        record.apply_patch(patch, now);
        record
    });

    let mut plan = MutationPlan::new(label);
    for key in keys {
        let scope = key.scope;
        let (id, patch, predicted) = (id.clone(), patch.clone(), predicted.clone());
        plan = plan.optimistic(key.clone(), move |items| {
            patched(scope, items, &id, &patch, predicted.as_ref(), now)
        });
    }
    plan
}

impl Session {
    async fn create_record<T: Record>(
        &self,
        cache: &EntityCache<T>,
        api: &dyn EntityApi<T>,
        key: CacheKey,
        label: &str,
        input: T::Input,
    ) -> MutationOutcome<T> {
        let plan = MutationPlan::new(label).touches(key);
        self.coordinator.run(cache, plan, api.create(&input), place::<T>).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_record<T: Record>(
        &self,
        cache: &EntityCache<T>,
        api: &dyn EntityApi<T>,
        keys: &[CacheKey],
        label: &str,
        id: &EntityId,
        patch: T::Patch,
        base: Option<T>,
    ) -> MutationOutcome<T> {
        let plan = update_plan(cache, keys, label, id, &patch, base);
        self.coordinator.run(cache, plan, api.update(id, &patch), place::<T>).await
    }

    async fn delete_record<T: Record>(
        &self,
        cache: &EntityCache<T>,
        api: &dyn EntityApi<T>,
        keys: &[CacheKey],
        label: &str,
        id: &EntityId,
    ) -> MutationOutcome<()> {
        let mut plan: MutationPlan<T> = MutationPlan::new(label);
        for key in keys {
            let id = id.clone();
            plan = plan.optimistic(key.clone(), move |items| remove_by_id(items, &id));
        }
        let target = id.clone();
        self.coordinator
            .run(cache, plan, api.delete(id), move |_, items, _: &()| remove_by_id(items, &target))
            .await
    }

    // ── Tasks ──────────────────────────────────────────────────────────────

    /// Shows a placeholder with a provisional id at the head of the active
    /// list until the server's record replaces it.
    pub async fn create_task(&self, input: TaskInput) -> MutationOutcome<Task> {
        let placeholder = Task::from_input(EntityId::provisional(), input.clone(), now_millis());
        let plan = MutationPlan::new("create task").optimistic(CacheKey::tasks(), move |items: Vec<Task>| {
            let mut task = placeholder.clone();
            task.position = Task::head_position(&items);
            upsert_sorted(CacheScope::Tasks, items, task)
        });
        self.coordinator
            .run(&self.caches.tasks, plan, self.apis.tasks.create(&input), place::<Task>)
            .await
    }

    pub async fn update_task(&self, id: &EntityId, patch: TaskPatch) -> MutationOutcome<Task> {
        self.update_record(&self.caches.tasks, self.apis.tasks.as_ref(), &task_keys(), "update task", id, patch, None)
            .await
    }

    pub async fn delete_task(&self, id: &EntityId) -> MutationOutcome<()> {
        self.delete_record(&self.caches.tasks, self.apis.tasks.as_ref(), &task_keys(), "delete task", id)
            .await
    }

    /// Put `ordered_ids` first, in that order. The server answers with the
    /// whole active list, which replaces ours.
    pub async fn reorder_tasks(&self, ordered_ids: &[EntityId]) -> MutationOutcome<Vec<Task>> {
        let ids = ordered_ids.to_vec();
        let now = now_millis();
        let plan = MutationPlan::new("reorder tasks")
            .optimistic(CacheKey::tasks(), move |items| Task::reordered(items, &ids, now));
        self.coordinator
            .run(
                &self.caches.tasks,
                plan,
                self.apis.task_ops.reorder(ordered_ids),
                |_, _, reply: &Vec<Task>| reply.clone(),
            )
            .await
    }

    pub async fn toggle_subtask(
        &self,
        task_id: &EntityId,
        subtask_id: &str,
        completed: bool,
    ) -> MutationOutcome<Task> {
        let (id, sub) = (task_id.clone(), subtask_id.to_string());
        let now = now_millis();
        let plan = MutationPlan::new("update subtask").optimistic(CacheKey::tasks(), move |mut items: Vec<Task>| {
            for task in items.iter_mut().filter(|t| t.id == id) {
                task.set_subtask_completed(&sub, completed, now);
            }
            items
        });
        self.coordinator
            .run(
                &self.caches.tasks,
                plan,
                self.apis.task_ops.toggle_subtask(task_id, subtask_id, completed),
                place::<Task>,
            )
            .await
    }

    /// Move a task to the archive. Issues an undo token right after the
    /// optimistic phase; the token is revoked if the archive rolls back.
    pub async fn archive_task(&self, id: &EntityId) -> Archived {
        let keys = task_keys();
        let patch = TaskPatch::archived(true);
        let plan = update_plan(&self.caches.tasks, &keys, "archive task", id, &patch, None);

        let pending = self.coordinator.begin(&self.caches.tasks, plan);
        let token = pending.previous(id).map(|task| self.undo.issue(task));

        let result = self
            .apis
            .tasks
            .update(id, &patch)
            .instrument(pending.span().clone())
            .await;
        let outcome = pending.finish(result, place::<Task>);

        if let (false, Some(token)) = (outcome.is_committed(), &token) {
            self.undo.revoke(token);
        }
        Archived { outcome, token }
    }

    pub async fn restore_task(&self, id: &EntityId) -> MutationOutcome<Task> {
        self.restore(id, None).await
    }

    /// Invoke an undo token: restore the archived task as it was.
    pub async fn undo(&self, token: &UndoToken) -> Result<Task, UndoError> {
        let task = self.undo.take(token)?;
        tracing::debug!(task = %task.id, "undo");
        let id = task.id.clone();
        self.restore(&id, Some(task)).await.into_result().map_err(UndoError::from)
    }

    async fn restore(&self, id: &EntityId, base: Option<Task>) -> MutationOutcome<Task> {
        self.update_record(
            &self.caches.tasks,
            self.apis.tasks.as_ref(),
            &task_keys(),
            "restore task",
            id,
            TaskPatch::archived(false),
            base,
        )
        .await
    }

    // ── People ─────────────────────────────────────────────────────────────

    /// Not optimistic: watch [`MutationCoordinator::loading`](crate::MutationCoordinator::loading).
    pub async fn create_person(&self, input: PersonInput) -> MutationOutcome<Person> {
        self.create_record(&self.caches.people, self.apis.people.as_ref(), CacheKey::people(), "add person", input)
            .await
    }

    pub async fn update_person(&self, id: &EntityId, patch: PersonPatch) -> MutationOutcome<Person> {
        self.update_record(
            &self.caches.people,
            self.apis.people.as_ref(),
            &[CacheKey::people()],
            "update person",
            id,
            patch,
            None,
        )
        .await
    }

    pub async fn delete_person(&self, id: &EntityId) -> MutationOutcome<()> {
        self.delete_record(&self.caches.people, self.apis.people.as_ref(), &[CacheKey::people()], "delete person", id)
            .await
    }

    // ── Notes ──────────────────────────────────────────────────────────────

    pub async fn create_note(&self, input: NoteInput) -> MutationOutcome<Note> {
        self.create_record(&self.caches.notes, self.apis.notes.as_ref(), CacheKey::notebook_notes(), "add note", input)
            .await
    }

    pub async fn update_note(&self, id: &EntityId, patch: NotePatch) -> MutationOutcome<Note> {
        self.update_record(
            &self.caches.notes,
            self.apis.notes.as_ref(),
            &[CacheKey::notebook_notes()],
            "update note",
            id,
            patch,
            None,
        )
        .await
    }

    pub async fn set_note_pinned(&self, id: &EntityId, pinned: bool) -> MutationOutcome<Note> {
        let label = if pinned { "pin note" } else { "unpin note" };
        self.update_record(
            &self.caches.notes,
            self.apis.notes.as_ref(),
            &[CacheKey::notebook_notes()],
            label,
            id,
            NotePatch::pinned(pinned),
            None,
        )
        .await
    }

    pub async fn delete_note(&self, id: &EntityId) -> MutationOutcome<()> {
        self.delete_record(
            &self.caches.notes,
            self.apis.notes.as_ref(),
            &[CacheKey::notebook_notes()],
            "delete note",
            id,
        )
        .await
    }

    // ── Labels ─────────────────────────────────────────────────────────────

    pub async fn create_label(&self, input: LabelInput) -> MutationOutcome<Label> {
        self.create_record(&self.caches.labels, self.apis.labels.as_ref(), CacheKey::labels(), "add label", input)
            .await
    }

    /// The server strips the label from every task, archived or not, so both
    /// task lists are refetched on commit.
    pub async fn delete_label(&self, id: &EntityId) -> MutationOutcome<()> {
        let outcome = self
            .delete_record(&self.caches.labels, self.apis.labels.as_ref(), &[CacheKey::labels()], "delete label", id)
            .await;
        if outcome.is_committed() {
            for scope in [CacheScope::Tasks, CacheScope::ArchivedTasks] {
                self.caches.tasks.invalidate_scope(scope);
            }
        }
        outcome
    }
}
