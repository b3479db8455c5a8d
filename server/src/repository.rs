//! SQLite-backed task repository (§4.2, §6 persisted state).
//!
//! Mirrors the teacher's `ServerDatabase`: a single connection guarded by a
//! mutex, idempotent `initialize`, and a process-global read-through cache
//! that gets invalidated on every write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use shared::task::{DailyAllocations, Task, TaskDraft, TaskId, TaskStatus};
use shared::validators::TaskLookup;
use tracing::info;

const DATABASE_FILE: &str = "taskdog.db";

pub struct TaskRepository {
    db_path: PathBuf,
    connection: Mutex<Connection>,
    cache: Mutex<Option<Vec<Task>>>,
}

impl TaskRepository {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
        }
        let db_path = data_dir.join(DATABASE_FILE);
        let connection = Connection::open(&db_path)
            .with_context(|| format!("failed to open database: {}", db_path.display()))?;
        connection
            .query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .context("failed to enable WAL mode")?;
        connection
            .execute("PRAGMA foreign_keys=ON", [])
            .context("failed to enable foreign key constraints")?;
        connection
            .busy_timeout(std::time::Duration::from_secs(30))
            .context("failed to set busy timeout")?;

        Ok(Self {
            db_path,
            connection: Mutex::new(connection),
            cache: Mutex::new(None),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        info!("initializing task repository at {}", self.db_path.display());
        let conn = self.connection.lock().unwrap();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                priority INTEGER,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                planned_start TEXT,
                planned_end TEXT,
                deadline TEXT,
                actual_start TEXT,
                actual_end TEXT,
                actual_duration REAL,
                estimated_duration REAL,
                is_fixed INTEGER NOT NULL DEFAULT 0,
                is_archived INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                daily_allocations_json TEXT NOT NULL DEFAULT '{}',
                actual_daily_hours_json TEXT NOT NULL DEFAULT '{}',
                depends_on_json TEXT NOT NULL DEFAULT '[]'
            )
            "#,
            [],
        )
        .context("failed to create tasks table")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tags (id INTEGER PRIMARY KEY, name TEXT UNIQUE NOT NULL)",
            [],
        )
        .context("failed to create tags table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS task_tags (
                task_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                ordinal INTEGER NOT NULL,
                PRIMARY KEY (task_id, tag_id),
                FOREIGN KEY (task_id) REFERENCES tasks (id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags (id) ON DELETE CASCADE
            )
            "#,
            [],
        )
        .context("failed to create task_tags table")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                operation TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id INTEGER,
                resource_name TEXT,
                success INTEGER NOT NULL,
                client_name TEXT,
                old_values_json TEXT,
                new_values_json TEXT,
                error_message TEXT
            )
            "#,
            [],
        )
        .context("failed to create audit_log table")?;

        conn.execute("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)", [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_log_timestamp ON audit_log(timestamp)",
            [],
        )?;

        info!("task repository initialization complete");
        Ok(())
    }

    /// §4.2 `getAll`: served from cache until the next write.
    pub fn get_all(&self) -> Result<Vec<Task>> {
        {
            let cache = self.cache.lock().unwrap();
            if let Some(tasks) = cache.as_ref() {
                return Ok(tasks.clone());
            }
        }
        let conn = self.connection.lock().unwrap();
        let tasks = Self::load_all(&conn)?;
        *self.cache.lock().unwrap() = Some(tasks.clone());
        Ok(tasks)
    }

    /// §4.2 `getById`: bypasses the cache.
    pub fn get_by_id(&self, id: TaskId) -> Result<Option<Task>> {
        let conn = self.connection.lock().unwrap();
        Self::load_one(&conn, id)
    }

    /// §4.2 `getByIds`: bypasses the cache, missing ids are simply omitted.
    pub fn get_by_ids(&self, ids: &[TaskId]) -> Result<HashMap<TaskId, Task>> {
        let conn = self.connection.lock().unwrap();
        let mut found = HashMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(task) = Self::load_one(&conn, id)? {
                found.insert(id, task);
            }
        }
        Ok(found)
    }

    /// §4.2 `save`: persists and refreshes `updated_at`, invalidates the cache.
    pub fn save(&self, task: &Task, now: NaiveDateTime) -> Result<Task> {
        let mut draft = task.draft();
        draft.updated_at = now;
        let stamped = draft
            .build()
            .context("task invariant violated while stamping updated_at")?;

        let conn = self.connection.lock().unwrap();
        Self::write_one(&conn, &stamped)?;
        drop(conn);
        self.reload();
        Ok(stamped)
    }

    /// §4.2 `saveAll`: atomic — either every task in the batch persists or none do.
    pub fn save_all(&self, tasks: &[Task], now: NaiveDateTime) -> Result<Vec<Task>> {
        let mut stamped = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut draft = task.draft();
            draft.updated_at = now;
            stamped.push(
                draft
                    .build()
                    .context("task invariant violated while stamping updated_at")?,
            );
        }

        let mut conn = self.connection.lock().unwrap();
        let tx = conn.transaction().context("failed to open transaction")?;
        for task in &stamped {
            Self::write_one(&tx, task)?;
        }
        tx.commit().context("failed to commit batch save")?;
        drop(conn);
        self.reload();
        Ok(stamped)
    }

    /// §4.2 `delete`: silent if the id is absent.
    pub fn delete(&self, id: TaskId) -> Result<()> {
        let conn = self.connection.lock().unwrap();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("failed to delete task")?;
        drop(conn);
        self.reload();
        Ok(())
    }

    /// §4.2 `generateNextId`: `max(id) + 1`, or `1` on an empty table.
    pub fn generate_next_id(&self) -> Result<TaskId> {
        let conn = self.connection.lock().unwrap();
        let max_id: Option<TaskId> = conn
            .query_row("SELECT MAX(id) FROM tasks", [], |row| row.get(0))
            .context("failed to read max task id")?;
        Ok(max_id.unwrap_or(0) + 1)
    }

    /// §4.2 `create`: assigns an id, builds, and saves.
    pub fn create(&self, mut draft: TaskDraft) -> Result<Task> {
        draft.id = self.generate_next_id()?;
        let task = draft.build().context("task invariant violated on create")?;
        let conn = self.connection.lock().unwrap();
        Self::write_one(&conn, &task)?;
        drop(conn);
        self.reload();
        Ok(task)
    }

    /// §4.2 `reload`: invalidates the cache.
    pub fn reload(&self) {
        *self.cache.lock().unwrap() = None;
    }

    pub fn append_audit(&self, event: &shared::events::AuditEvent) -> Result<()> {
        let conn = self.connection.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO audit_log
                (timestamp, operation, resource_type, resource_id, resource_name,
                 success, client_name, old_values_json, new_values_json, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                event.timestamp.to_string(),
                event.operation,
                event.resource_type,
                event.resource_id,
                event.resource_name,
                event.success as i64,
                event.client_name,
                event.old_values.as_ref().map(|v| v.to_string()),
                event.new_values.as_ref().map(|v| v.to_string()),
                event.error_message,
            ],
        )
        .context("failed to append audit log entry")?;
        Ok(())
    }

    fn load_all(conn: &Connection) -> Result<Vec<Task>> {
        let mut stmt = conn
            .prepare("SELECT id FROM tasks ORDER BY id ASC")
            .context("failed to prepare task listing")?;
        let ids: Vec<TaskId> = stmt
            .query_map([], |row| row.get(0))
            .context("failed to query task ids")?
            .collect::<rusqlite::Result<_>>()?;
        ids.into_iter()
            .map(|id| {
                Self::load_one(conn, id)?
                    .context("task id vanished between listing and load")
            })
            .collect()
    }

    fn load_one(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
        let row = conn
            .query_row(
                r#"
                SELECT id, name, priority, status, created_at, updated_at, planned_start,
                       planned_end, deadline, actual_start, actual_end, actual_duration,
                       estimated_duration, is_fixed, is_archived, notes,
                       daily_allocations_json, actual_daily_hours_json, depends_on_json
                FROM tasks WHERE id = ?1
                "#,
                params![id],
                Self::row_to_draft,
            )
            .optional()
            .context("failed to query task by id")?;
        let Some(mut draft) = row else {
            return Ok(None);
        };
        draft.tags = Self::load_tags(conn, id)?;
        Ok(Some(draft.build().context("stored task failed invariant check on load")?))
    }

    fn row_to_draft(row: &rusqlite::Row) -> rusqlite::Result<TaskDraft> {
        let status_str: String = row.get("status")?;
        let status = parse_status(&status_str);
        let daily_allocations_json: String = row.get("daily_allocations_json")?;
        let actual_daily_hours_json: String = row.get("actual_daily_hours_json")?;
        let depends_on_json: String = row.get("depends_on_json")?;

        Ok(TaskDraft {
            id: row.get("id")?,
            name: row.get("name")?,
            priority: row.get("priority")?,
            status,
            created_at: parse_datetime(&row.get::<_, String>("created_at")?),
            updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
            planned_start: row.get::<_, Option<String>>("planned_start")?.map(|s| parse_datetime(&s)),
            planned_end: row.get::<_, Option<String>>("planned_end")?.map(|s| parse_datetime(&s)),
            deadline: row.get::<_, Option<String>>("deadline")?.map(|s| parse_datetime(&s)),
            actual_start: row.get::<_, Option<String>>("actual_start")?.map(|s| parse_datetime(&s)),
            actual_end: row.get::<_, Option<String>>("actual_end")?.map(|s| parse_datetime(&s)),
            actual_duration: row.get("actual_duration")?,
            estimated_duration: row.get("estimated_duration")?,
            is_fixed: row.get::<_, i64>("is_fixed")? != 0,
            is_archived: row.get::<_, i64>("is_archived")? != 0,
            daily_allocations: decode_grid(&daily_allocations_json),
            actual_daily_hours: decode_grid(&actual_daily_hours_json),
            depends_on: serde_json::from_str(&depends_on_json).unwrap_or_default(),
            tags: Vec::new(),
            notes: row.get("notes")?,
        })
    }

    /// Tags are an ordered sequence (§3, §8 "identity-preserving round
    /// trip"), so this orders by the `task_tags.ordinal` position recorded
    /// at write time rather than alphabetically by tag name.
    fn load_tags(conn: &Connection, task_id: TaskId) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT tags.name FROM tags
            JOIN task_tags ON task_tags.tag_id = tags.id
            WHERE task_tags.task_id = ?1
            ORDER BY task_tags.ordinal ASC
            "#,
        )?;
        let names = stmt
            .query_map(params![task_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(names)
    }

    fn write_one(conn: &Connection, task: &Task) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO tasks
                (id, name, priority, status, created_at, updated_at, planned_start, planned_end,
                 deadline, actual_start, actual_end, actual_duration, estimated_duration,
                 is_fixed, is_archived, notes, daily_allocations_json, actual_daily_hours_json,
                 depends_on_json)
            VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
            ON CONFLICT(id) DO UPDATE SET
                name=excluded.name, priority=excluded.priority, status=excluded.status,
                updated_at=excluded.updated_at, planned_start=excluded.planned_start,
                planned_end=excluded.planned_end, deadline=excluded.deadline,
                actual_start=excluded.actual_start, actual_end=excluded.actual_end,
                actual_duration=excluded.actual_duration, estimated_duration=excluded.estimated_duration,
                is_fixed=excluded.is_fixed, is_archived=excluded.is_archived, notes=excluded.notes,
                daily_allocations_json=excluded.daily_allocations_json,
                actual_daily_hours_json=excluded.actual_daily_hours_json,
                depends_on_json=excluded.depends_on_json
            "#,
            params![
                task.id(),
                task.name(),
                task.priority(),
                task.status().as_str(),
                task.created_at().to_string(),
                task.updated_at().to_string(),
                task.planned_start().map(|d| d.to_string()),
                task.planned_end().map(|d| d.to_string()),
                task.deadline().map(|d| d.to_string()),
                task.actual_start().map(|d| d.to_string()),
                task.actual_end().map(|d| d.to_string()),
                task.actual_duration(),
                task.estimated_duration(),
                task.is_fixed() as i64,
                task.is_archived() as i64,
                task.notes(),
                encode_grid(task.daily_allocations()),
                encode_grid(task.actual_daily_hours()),
                serde_json::to_string(task.depends_on()).unwrap(),
            ],
        )
        .context("failed to upsert task row")?;

        conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task.id()])
            .context("failed to clear task tags")?;
        for (ordinal, tag) in task.tags().iter().enumerate() {
            conn.execute(
                "INSERT OR IGNORE INTO tags (name) VALUES (?1)",
                params![tag],
            )
            .context("failed to upsert tag")?;
            let tag_id: i64 = conn
                .query_row("SELECT id FROM tags WHERE name = ?1", params![tag], |row| row.get(0))
                .context("failed to resolve tag id")?;
            conn.execute(
                "INSERT OR IGNORE INTO task_tags (task_id, tag_id, ordinal) VALUES (?1, ?2, ?3)",
                params![task.id(), tag_id, ordinal as i64],
            )
            .context("failed to link task tag")?;
        }
        Ok(())
    }
}

/// Object-safe seam so `shared::validators` can check dependency existence
/// without depending on the concrete SQLite repository.
impl TaskLookup for TaskRepository {
    fn get_by_ids(&self, ids: &[TaskId]) -> HashMap<TaskId, Task> {
        TaskRepository::get_by_ids(self, ids).unwrap_or_default()
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        "canceled" => TaskStatus::Canceled,
        _ => TaskStatus::Pending,
    }
}

fn parse_datetime(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .expect("stored datetime column is not parseable")
}

fn encode_grid(grid: &DailyAllocations) -> String {
    let as_strings: HashMap<String, f64> = grid.iter().map(|(d, h)| (d.to_string(), *h)).collect();
    serde_json::to_string(&as_strings).unwrap()
}

fn decode_grid(json: &str) -> DailyAllocations {
    let as_strings: HashMap<String, f64> = serde_json::from_str(json).unwrap_or_default();
    as_strings
        .into_iter()
        .filter_map(|(d, h)| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok().map(|d| (d, h)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 20).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn repo() -> (TaskRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let repo = TaskRepository::new(dir.path()).unwrap();
        repo.initialize().unwrap();
        (repo, dir)
    }

    #[test]
    fn create_then_get_all_round_trips() {
        let (repo, _dir) = repo();
        let mut draft = TaskDraft::new(0, "write report", now());
        draft.tags = vec!["writing".to_string(), "urgent".to_string()];
        draft.depends_on = vec![5, 6];
        let created = repo.create(draft).unwrap();
        assert_eq!(created.id(), 1);

        let all = repo.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name(), "write report");
        assert_eq!(all[0].tags(), &["writing".to_string(), "urgent".to_string()]);
        assert_eq!(all[0].depends_on(), &[5, 6]);
    }

    #[test]
    fn save_refreshes_updated_at_and_invalidates_cache() {
        let (repo, _dir) = repo();
        let draft = TaskDraft::new(0, "task", now());
        let created = repo.create(draft).unwrap();
        let _ = repo.get_all().unwrap();

        let later = now() + chrono::Duration::days(1);
        let saved = repo.save(&created, later).unwrap();
        assert_eq!(saved.updated_at(), later);

        let reloaded = repo.get_by_id(created.id()).unwrap().unwrap();
        assert_eq!(reloaded.updated_at(), later);
    }

    #[test]
    fn delete_is_silent_on_missing_id() {
        let (repo, _dir) = repo();
        assert!(repo.delete(999).is_ok());
    }

    #[test]
    fn generate_next_id_is_max_plus_one() {
        let (repo, _dir) = repo();
        assert_eq!(repo.generate_next_id().unwrap(), 1);
        repo.create(TaskDraft::new(0, "a", now())).unwrap();
        repo.create(TaskDraft::new(0, "b", now())).unwrap();
        assert_eq!(repo.generate_next_id().unwrap(), 3);
    }

    #[test]
    fn get_by_ids_omits_missing() {
        let (repo, _dir) = repo();
        let created = repo.create(TaskDraft::new(0, "a", now())).unwrap();
        let found = repo.get_by_ids(&[created.id(), 999]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key(&created.id()));
    }
}
