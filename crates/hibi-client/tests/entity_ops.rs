//! Per-kind operations: what each shows before the server answers and what
//! it settles to.

mod common;

use common::{MockBackend, Step, held, ids, network_down, session, settle, task};
use hibi_client::MutationError;
use hibi_types::{
    CacheKey, EntityId, Label, Note, NoteInput, NotePatch, Person, PersonInput, PersonPatch, Record,
    Subtask,
};

fn note(id: &str, title: &str, updated_at: u64) -> Note {
    let input = NoteInput { title: title.into(), content: String::new(), pinned: false };
    let mut n = Note::from_input(EntityId::new(id), input, updated_at);
    n.updated_at = updated_at;
    n
}

fn person(id: &str, name: &str) -> Person {
    Person::from_input(EntityId::new(id), PersonInput::named(name), 1)
}

#[tokio::test(start_paused = true)]
async fn test_reorder_shows_new_order_then_takes_server_list() {
    let backend = MockBackend::new();
    backend.seed(|t| {
        t.tasks.push(task("t_a", "a", 0));
        t.tasks.push(task("t_b", "b", 1));
        t.tasks.push(task("t_c", "c", 2));
    });
    let session = session(&backend);
    let _view = session.caches().tasks.subscribe(CacheKey::tasks());
    settle().await;

    let (step, release) = held();
    backend.script(step);
    let order = [EntityId::new("t_c"), EntityId::new("t_a")];
    let reorder = tokio::spawn({
        let session = session.clone();
        async move { session.reorder_tasks(&order).await }
    });
    settle().await;
    let visible = session.caches().tasks.read(&CacheKey::tasks()).unwrap();
    assert_eq!(ids(&visible), ["t_c", "t_a", "t_b"]);

    release.pass();
    let reply = reorder.await.unwrap().into_result().unwrap();
    assert_eq!(session.caches().tasks.read(&CacheKey::tasks()).unwrap(), reply);
    assert_eq!(backend.calls(), ["reorder todos"]);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_subtask_round_trip() {
    let backend = MockBackend::new();
    backend.seed(|t| {
        let mut parent = task("t_a", "Release", 0);
        parent.subtasks.push(Subtask { id: "s1".into(), title: "Notes".into(), completed: false });
        t.tasks.push(parent);
    });
    let session = session(&backend);
    let _view = session.caches().tasks.subscribe(CacheKey::tasks());
    settle().await;

    let outcome = session.toggle_subtask(&EntityId::new("t_a"), "s1", true).await;
    assert!(outcome.committed().unwrap().subtasks[0].completed);
    assert!(session.caches().tasks.read(&CacheKey::tasks()).unwrap()[0].subtasks[0].completed);

    backend.script(Step::Fail(network_down()));
    let outcome = session.toggle_subtask(&EntityId::new("t_a"), "s1", false).await;
    assert!(!outcome.is_committed());
    assert!(session.caches().tasks.read(&CacheKey::tasks()).unwrap()[0].subtasks[0].completed);
}

#[tokio::test(start_paused = true)]
async fn test_restore_moves_task_back_to_active() {
    let backend = MockBackend::new();
    backend.seed(|t| {
        t.tasks.push(task("t_a", "Live", 0));
        let mut old = task("t_old", "Old", 3);
        old.archived = true;
        t.tasks.push(old);
    });
    let session = session(&backend);
    let _active = session.caches().tasks.subscribe(CacheKey::tasks());
    let _archived = session.caches().tasks.subscribe(CacheKey::archived_tasks());
    settle().await;

    let outcome = session.restore_task(&EntityId::new("t_old")).await;
    assert!(outcome.is_committed());
    let active = session.caches().tasks.read(&CacheKey::tasks()).unwrap();
    assert_eq!(ids(&active), ["t_a", "t_old"]);
    assert!(session.caches().tasks.read(&CacheKey::archived_tasks()).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_person_update_and_delete() {
    let backend = MockBackend::new();
    backend.seed(|t| {
        t.people.push(person("p_1", "Ada"));
        t.people.push(person("p_2", "Grace"));
    });
    let session = session(&backend);
    let _view = session.caches().people.subscribe(CacheKey::people());
    settle().await;

    let patch = PersonPatch { email: Some(Some("ada@example.com".into())), ..Default::default() };
    let updated = session.update_person(&EntityId::new("p_1"), patch).await.into_result().unwrap();
    assert_eq!(updated.email.as_deref(), Some("ada@example.com"));

    backend.script(Step::Fail(network_down()));
    assert!(!session.delete_person(&EntityId::new("p_2")).await.is_committed());
    assert_eq!(session.caches().people.read(&CacheKey::people()).unwrap().len(), 2);

    assert!(session.delete_person(&EntityId::new("p_2")).await.is_committed());
    let people = session.caches().people.read(&CacheKey::people()).unwrap();
    assert_eq!(ids(&people), ["p_1"]);
    assert_eq!(people, backend.tables(|t| t.people.clone()));
}

#[tokio::test(start_paused = true)]
async fn test_pinning_a_note_moves_it_first() {
    let backend = MockBackend::new();
    backend.seed(|t| {
        t.notes.push(note("n_new", "Newer", 200));
        t.notes.push(note("n_old", "Older", 100));
    });
    let session = session(&backend);
    let _view = session.caches().notes.subscribe(CacheKey::notebook_notes());
    settle().await;
    let before = session.caches().notes.read(&CacheKey::notebook_notes()).unwrap();
    assert_eq!(ids(&before), ["n_new", "n_old"]);

    let (step, release) = held();
    backend.script(step);
    let pin = tokio::spawn({
        let session = session.clone();
        async move { session.set_note_pinned(&EntityId::new("n_old"), true).await }
    });
    settle().await;
    let pinned = session.caches().notes.read(&CacheKey::notebook_notes()).unwrap();
    assert_eq!(ids(&pinned), ["n_old", "n_new"]);
    assert!(pinned[0].pinned);

    release.fail(network_down());
    assert!(!pin.await.unwrap().is_committed());
    assert_eq!(session.caches().notes.read(&CacheKey::notebook_notes()).unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn test_note_create_update_delete() {
    let backend = MockBackend::new();
    let session = session(&backend);
    let _view = session.caches().notes.subscribe(CacheKey::notebook_notes());
    settle().await;

    let input = NoteInput { title: "Ideas".into(), content: "none yet".into(), pinned: false };
    let created = session.create_note(input).await.into_result().unwrap();

    let patch = NotePatch { content: Some("one".into()), ..Default::default() };
    let updated = session.update_note(&created.id, patch).await.into_result().unwrap();
    assert_eq!(updated.content, "one");
    assert_eq!(session.caches().notes.read(&CacheKey::notebook_notes()).unwrap(), vec![updated]);

    assert!(session.delete_note(&created.id).await.is_committed());
    assert!(session.caches().notes.read(&CacheKey::notebook_notes()).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_label_delete_refreshes_both_task_lists() {
    let backend = MockBackend::new();
    let label = EntityId::new("l_1");
    backend.seed(|t| {
        t.labels.push(Label::from_input(label.clone(), Default::default(), 1));
        let mut live = task("t_a", "Tagged", 0);
        live.labels.push(label.clone());
        let mut filed = task("t_old", "Filed away", 1);
        filed.labels.push(label.clone());
        filed.archived = true;
        t.tasks.push(live);
        t.tasks.push(filed);
    });
    let session = session(&backend);
    let _labels = session.caches().labels.subscribe(CacheKey::labels());
    let _active = session.caches().tasks.subscribe(CacheKey::tasks());
    let _archived = session.caches().tasks.subscribe(CacheKey::archived_tasks());
    settle().await;
    let active_lists = backend.list_count(&CacheKey::tasks());
    let archived_lists = backend.list_count(&CacheKey::archived_tasks());

    backend.script(Step::Fail(network_down()));
    let failed = session.delete_label(&label).await;
    assert!(matches!(failed.into_result(), Err(MutationError::Transport(_))));
    settle().await;
    assert_eq!(backend.list_count(&CacheKey::tasks()), active_lists);
    assert_eq!(session.caches().labels.read(&CacheKey::labels()).unwrap().len(), 1);

    assert!(session.delete_label(&label).await.is_committed());
    settle().await;
    assert!(session.caches().labels.read(&CacheKey::labels()).unwrap().is_empty());
    assert_eq!(backend.list_count(&CacheKey::tasks()), active_lists + 1);
    assert_eq!(backend.list_count(&CacheKey::archived_tasks()), archived_lists + 1);

    let archived = session.caches().tasks.read(&CacheKey::archived_tasks()).unwrap();
    assert_eq!(ids(&archived), ["t_old"]);
    assert!(archived[0].labels.is_empty());
    assert!(session.caches().tasks.read(&CacheKey::tasks()).unwrap()[0].labels.is_empty());
}
