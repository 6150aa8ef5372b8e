//! SQLite persistence for entities.
//!
//! One table holds every kind. Records are stored as their JSON wire form so
//! the schema does not chase field additions; filtering and ordering happen
//! through [`Record`] after load, which keeps list semantics identical to the
//! client's cache order policies.

use std::path::Path;

use hibi_types::{
    CacheScope, EntityId, Filter, Label, Record, Task, TaskInput, ValidationError, now_millis,
    sort_for,
};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    kind TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (kind, id)
);
CREATE INDEX IF NOT EXISTS idx_entities_kind ON entities(kind, created_at);
"#;

/// Entity store handle. Safe to share across handler tasks.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // =========================================================================
    // Generic CRUD
    // =========================================================================

    /// Records of `T` in `scope` passing `filter`, in the scope's order.
    pub fn list<T: Record>(&self, scope: CacheScope, filter: &Filter) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock();
        let mut items: Vec<T> = load_all::<T>(&conn)?
            .into_iter()
            .filter(|r| r.in_scope(scope) && r.matches(filter))
            .collect();
        sort_for(scope, &mut items);
        Ok(items)
    }

    pub fn get<T: Record>(&self, id: &EntityId) -> StoreResult<T> {
        let conn = self.conn.lock();
        load_one::<T>(&conn, id)
    }

    pub fn create<T: Record>(&self, input: T::Input) -> StoreResult<T> {
        T::validate_input(&input)?;
        let record = T::from_input(EntityId::generate(T::KIND), input, now_millis());
        let conn = self.conn.lock();
        insert(&conn, &record)?;
        tracing::debug!(kind = %T::KIND, id = %record.id(), "created");
        Ok(record)
    }

    pub fn update<T: Record>(&self, id: &EntityId, patch: &T::Patch) -> StoreResult<T> {
        T::validate_patch(patch)?;
        let conn = self.conn.lock();
        let mut record = load_one::<T>(&conn, id)?;
        record.apply_patch(patch, now_millis());
        save(&conn, &record)?;
        Ok(record)
    }

    pub fn delete<T: Record>(&self, id: &EntityId) -> StoreResult<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
            params![T::KIND.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(not_found::<T>(id));
        }
        Ok(())
    }

    // =========================================================================
    // Kind-specific operations
    // =========================================================================

    /// Create a task at the head of the active list.
    pub fn create_task(&self, input: TaskInput) -> StoreResult<Task> {
        Task::validate_input(&input)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let active: Vec<Task> = load_all::<Task>(&tx)?
            .into_iter()
            .filter(|t| t.in_scope(CacheScope::Tasks))
            .collect();
        let mut task = Task::from_input(EntityId::generate(Task::KIND), input, now_millis());
        task.position = Task::head_position(&active);
        insert(&tx, &task)?;
        tx.commit()?;
        tracing::debug!(id = %task.id, position = task.position, "created task");
        Ok(task)
    }

    /// Apply an explicit order to the active list. Unknown ids are ignored.
    /// Returns the full active list in its new order.
    pub fn reorder_tasks(&self, ordered_ids: &[EntityId]) -> StoreResult<Vec<Task>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let active: Vec<Task> = load_all::<Task>(&tx)?
            .into_iter()
            .filter(|t| t.in_scope(CacheScope::Tasks))
            .collect();
        let before: Vec<(EntityId, i64)> = active.iter().map(|t| (t.id.clone(), t.position)).collect();

        let reordered = Task::reordered(active, ordered_ids, now_millis());
        for task in &reordered {
            let unchanged = before.iter().any(|(id, pos)| id == &task.id && *pos == task.position);
            if !unchanged {
                save(&tx, task)?;
            }
        }
        tx.commit()?;
        Ok(reordered)
    }

    pub fn toggle_subtask(
        &self,
        task_id: &EntityId,
        subtask_id: &str,
        completed: bool,
    ) -> StoreResult<Task> {
        let conn = self.conn.lock();
        let mut task = load_one::<Task>(&conn, task_id)?;
        if !task.set_subtask_completed(subtask_id, completed, now_millis()) {
            return Err(StoreError::NotFound { kind: "subtask", id: subtask_id.to_string() });
        }
        save(&conn, &task)?;
        Ok(task)
    }

    /// Delete a label and strip it from every task that carries it.
    pub fn delete_label(&self, id: &EntityId) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
            params![Label::KIND.as_str(), id.as_str()],
        )?;
        if n == 0 {
            return Err(not_found::<Label>(id));
        }

        let now = now_millis();
        let mut stripped = 0usize;
        for mut task in load_all::<Task>(&tx)? {
            if task.labels.contains(id) {
                task.labels.retain(|l| l != id);
                task.updated_at = now;
                save(&tx, &task)?;
                stripped += 1;
            }
        }
        tx.commit()?;
        tracing::debug!(label = %id, stripped, "deleted label");
        Ok(())
    }
}

fn not_found<T: Record>(id: &EntityId) -> StoreError {
    StoreError::NotFound { kind: T::KIND.as_str(), id: id.to_string() }
}

fn decode<T: Record>(id: &str, body: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(|source| StoreError::Corrupt { id: id.to_string(), source })
}

fn encode<T: Record>(record: &T) -> StoreResult<String> {
    serde_json::to_string(record)
        .map_err(|source| StoreError::Corrupt { id: record.id().to_string(), source })
}

fn load_all<T: Record>(conn: &Connection) -> StoreResult<Vec<T>> {
    let mut stmt = conn.prepare("SELECT id, body FROM entities WHERE kind = ?1")?;
    let rows = stmt.query_map(params![T::KIND.as_str()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut items = Vec::new();
    for row in rows {
        let (id, body) = row?;
        items.push(decode::<T>(&id, &body)?);
    }
    Ok(items)
}

fn load_one<T: Record>(conn: &Connection, id: &EntityId) -> StoreResult<T> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM entities WHERE kind = ?1 AND id = ?2",
            params![T::KIND.as_str(), id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(body) => decode(id.as_str(), &body),
        None => Err(not_found::<T>(id)),
    }
}

fn insert<T: Record>(conn: &Connection, record: &T) -> StoreResult<()> {
    let now = now_millis() as i64;
    conn.execute(
        "INSERT INTO entities (kind, id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            T::KIND.as_str(),
            record.id().as_str(),
            encode(record)?,
            record.created_at() as i64,
            now,
        ],
    )?;
    Ok(())
}

fn save<T: Record>(conn: &Connection, record: &T) -> StoreResult<()> {
    conn.execute(
        "UPDATE entities SET body = ?3, updated_at = ?4 WHERE kind = ?1 AND id = ?2",
        params![
            T::KIND.as_str(),
            record.id().as_str(),
            encode(record)?,
            now_millis() as i64,
        ],
    )?;
    Ok(())
}
