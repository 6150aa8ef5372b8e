//! Shared fixtures: an in-memory store with scripted responses, and an
//! event source the test pushes frames into.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use hibi_client::{
    ApiError, Apis, ClientConfig, EntityApi, EventSource, FrameStream, Session, SseEvent, SseFrame,
    StreamError, TaskApi,
};
use hibi_types::{
    CacheKey, EntityId, Label, Note, Person, Record, Task, now_millis, sort_for,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// How the next write call behaves.
pub enum Step {
    Pass,
    Fail(ApiError),
    /// Wait for the paired [`Release`], then pass or fail.
    Held(oneshot::Receiver<Option<ApiError>>),
}

/// Lets a [`Step::Held`] write complete.
pub struct Release(oneshot::Sender<Option<ApiError>>);

impl Release {
    pub fn pass(self) {
        let _ = self.0.send(None);
    }

    pub fn fail(self, err: ApiError) {
        let _ = self.0.send(Some(err));
    }
}

pub fn held() -> (Step, Release) {
    let (tx, rx) = oneshot::channel();
    (Step::Held(rx), Release(tx))
}

pub fn network_down() -> ApiError {
    ApiError::Transport("connection refused".into())
}

#[derive(Default)]
pub struct Tables {
    pub tasks: Vec<Task>,
    pub people: Vec<Person>,
    pub notes: Vec<Note>,
    pub labels: Vec<Label>,
}

#[derive(Default)]
struct State {
    tables: Tables,
    script: VecDeque<Step>,
    calls: Vec<String>,
    lists: Vec<CacheKey>,
    held_lists: VecDeque<oneshot::Receiver<Option<ApiError>>>,
}

/// In-memory store. Writes consume scripted steps in order (default: pass)
/// and apply only once their step passes, like a server would.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, step: Step) {
        self.state.lock().script.push_back(step);
    }

    pub fn seed(&self, f: impl FnOnce(&mut Tables)) {
        f(&mut self.state.lock().tables);
    }

    pub fn tables<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.state.lock().tables)
    }

    /// Write calls, e.g. `"update todos t_1"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Every key listed so far.
    pub fn lists(&self) -> Vec<CacheKey> {
        self.state.lock().lists.clone()
    }

    /// The next list call reads the tables right away but answers only once
    /// released.
    pub fn hold_list(&self) -> Release {
        let (tx, rx) = oneshot::channel();
        self.state.lock().held_lists.push_back(rx);
        Release(tx)
    }

    pub fn list_count(&self, key: &CacheKey) -> usize {
        self.state.lock().lists.iter().filter(|k| *k == key).count()
    }

    async fn step(&self, call: String) -> Result<(), ApiError> {
        let step = {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.script.pop_front().unwrap_or(Step::Pass)
        };
        match step {
            Step::Pass => Ok(()),
            Step::Fail(err) => Err(err),
            Step::Held(rx) => match rx.await {
                Ok(Some(err)) => Err(err),
                _ => Ok(()),
            },
        }
    }
}

/// Maps a record type onto its table.
pub trait Table: Record {
    fn table(tables: &mut Tables) -> &mut Vec<Self>;

    fn on_create(_tables: &Tables, _record: &mut Self) {}

    /// Cascade of a successful delete of `id`.
    fn on_delete(_tables: &mut Tables, _id: &EntityId) {}
}

impl Table for Task {
    fn table(tables: &mut Tables) -> &mut Vec<Self> {
        &mut tables.tasks
    }

    fn on_create(tables: &Tables, task: &mut Self) {
        let active: Vec<Task> = tables.tasks.iter().filter(|t| !t.archived).cloned().collect();
        task.position = Task::head_position(&active);
    }
}

impl Table for Person {
    fn table(tables: &mut Tables) -> &mut Vec<Self> {
        &mut tables.people
    }
}

impl Table for Note {
    fn table(tables: &mut Tables) -> &mut Vec<Self> {
        &mut tables.notes
    }
}

impl Table for Label {
    fn table(tables: &mut Tables) -> &mut Vec<Self> {
        &mut tables.labels
    }

    fn on_delete(tables: &mut Tables, id: &EntityId) {
        for task in tables.tasks.iter_mut() {
            task.labels.retain(|l| l != id);
        }
    }
}

fn not_found(id: &EntityId) -> ApiError {
    ApiError::status(404, format!("{id} not found"))
}

#[async_trait]
impl<T: Table> EntityApi<T> for MockBackend {
    async fn list(&self, key: &CacheKey) -> Result<Vec<T>, ApiError> {
        let (mut items, hold) = {
            let mut state = self.state.lock();
            state.lists.push(key.clone());
            let items: Vec<T> = T::table(&mut state.tables)
                .iter()
                .filter(|r| r.in_scope(key.scope) && r.matches(&key.filter))
                .cloned()
                .collect();
            (items, state.held_lists.pop_front())
        };
        if let Some(rx) = hold {
            if let Ok(Some(err)) = rx.await {
                return Err(err);
            }
        }
        sort_for(key.scope, &mut items);
        Ok(items)
    }

    async fn create(&self, input: &T::Input) -> Result<T, ApiError> {
        self.step(format!("create {}", T::KIND)).await?;
        let mut state = self.state.lock();
        let mut record = T::from_input(EntityId::generate(T::KIND), input.clone(), now_millis());
        T::on_create(&state.tables, &mut record);
        T::table(&mut state.tables).push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: &EntityId, patch: &T::Patch) -> Result<T, ApiError> {
        self.step(format!("update {} {id}", T::KIND)).await?;
        let mut state = self.state.lock();
        let record = T::table(&mut state.tables)
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or_else(|| not_found(id))?;
        record.apply_patch(patch, now_millis());
        Ok(record.clone())
    }

    async fn delete(&self, id: &EntityId) -> Result<(), ApiError> {
        self.step(format!("delete {} {id}", T::KIND)).await?;
        let mut state = self.state.lock();
        let table = T::table(&mut state.tables);
        let before = table.len();
        table.retain(|r| r.id() != id);
        if table.len() == before {
            return Err(not_found(id));
        }
        T::on_delete(&mut state.tables, id);
        Ok(())
    }
}

#[async_trait]
impl TaskApi for MockBackend {
    async fn reorder(&self, ordered_ids: &[EntityId]) -> Result<Vec<Task>, ApiError> {
        self.step("reorder todos".to_string()).await?;
        let mut state = self.state.lock();
        let (active, archived): (Vec<Task>, Vec<Task>) =
            state.tables.tasks.drain(..).partition(|t| !t.archived);
        let active = Task::reordered(active, ordered_ids, now_millis());
        state.tables.tasks = active.iter().cloned().chain(archived).collect();
        Ok(active)
    }

    async fn toggle_subtask(
        &self,
        task_id: &EntityId,
        subtask_id: &str,
        completed: bool,
    ) -> Result<Task, ApiError> {
        self.step(format!("toggle todos {task_id} {subtask_id}")).await?;
        let mut state = self.state.lock();
        let task = state
            .tables
            .tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| not_found(task_id))?;
        if !task.set_subtask_completed(subtask_id, completed, now_millis()) {
            return Err(ApiError::status(404, format!("subtask {subtask_id} not found")));
        }
        Ok(task.clone())
    }
}

/// Event source whose connections the test controls.
#[derive(Default)]
pub struct MockSource {
    connects: AtomicUsize,
    refuse: AtomicUsize,
    current: Mutex<Option<mpsc::UnboundedSender<Result<SseFrame, StreamError>>>>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Push one `data:` frame on the live connection.
    pub fn push(&self, data: &str) {
        let frame = SseFrame::Event(SseEvent { event: None, data: data.to_string() });
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.unbounded_send(Ok(frame));
        }
    }

    pub fn heartbeat(&self) {
        if let Some(tx) = self.current.lock().as_ref() {
            let _ = tx.unbounded_send(Ok(SseFrame::Comment("heartbeat".into())));
        }
    }

    /// Fail the live connection with a read error.
    pub fn fail(&self) {
        if let Some(tx) = self.current.lock().take() {
            let _ = tx.unbounded_send(Err(StreamError::Read("connection reset".into())));
        }
    }

    /// End the live connection cleanly.
    pub fn hang_up(&self) {
        self.current.lock().take();
    }
}

#[async_trait]
impl EventSource for MockSource {
    async fn connect(&self) -> Result<FrameStream, StreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StreamError::Connect("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded();
        *self.current.lock() = Some(tx);
        Ok(rx.boxed())
    }
}

/// Session over `backend` with default timings.
pub fn session(backend: &Arc<MockBackend>) -> Arc<Session> {
    Arc::new(Session::new(Apis::from_backend(backend.clone()), ClientConfig::default()))
}

/// Let every runnable task (refetches, stream driver) run to idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn task(id: &str, title: &str, position: i64) -> Task {
    let mut t = Task::from_input(EntityId::new(id), hibi_types::TaskInput::titled(title), 1_700_000_000_000);
    t.position = position;
    t
}

pub fn ids<T: Record>(items: &[T]) -> Vec<String> {
    items.iter().map(|r| r.id().to_string()).collect()
}
