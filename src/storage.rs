use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::OnceCell;

use crate::models::{NewTask, Reminder, Task, TaskId};

const DB_FILE: &str = "tasks.sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TASK_COLUMNS: &str =
    "id, title, date, completed, created_at, notification_time, notification_scheduled_for";

struct Migration {
    version: u32,
    sql: &'static str,
}

// Versions must stay strictly increasing; each one is mirrored to `PRAGMA user_version`.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "
        CREATE TABLE tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            date TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            notification_time TEXT,
            notification_scheduled_for TEXT
        );
        CREATE INDEX idx_tasks_date ON tasks(date);
        CREATE INDEX idx_tasks_completed ON tasks(completed);
        CREATE INDEX idx_tasks_created_at ON tasks(created_at);
    ",
}];

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Corrupt(String),
    NotFound(TaskId),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(err) => write!(f, "sqlite error: {err}"),
            StorageError::Io(err) => write!(f, "io error: {err}"),
            StorageError::Json(err) => write!(f, "json error: {err}"),
            StorageError::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            StorageError::Corrupt(message) => write!(f, "corrupt record: {message}"),
            StorageError::NotFound(id) => write!(f, "task {id} not found"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Sqlite(err) => Some(err),
            StorageError::Io(err) => Some(err),
            StorageError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        StorageError::Sqlite(value)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        StorageError::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        StorageError::Json(value)
    }
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Durable task records keyed by id, indexed by date.
///
/// The connection is opened lazily through a one-shot initializer, so
/// concurrent first calls share a single open and migration pass.
pub struct TaskStore {
    location: Location,
    conn: OnceCell<Mutex<Connection>>,
}

impl TaskStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            location: Location::File(path),
            conn: OnceCell::new(),
        }
    }

    pub fn in_data_dir(root: &Path) -> Self {
        Self::new(root.join(DB_FILE))
    }

    pub fn in_memory() -> Self {
        Self {
            location: Location::Memory,
            conn: OnceCell::new(),
        }
    }

    /// Opens the backing database and applies pending migrations.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.connection().await.map(|_| ())
    }

    pub async fn create(&self, data: NewTask) -> Result<Task, StorageError> {
        let created_at = Utc::now().trunc_subsecs(6);
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tasks (title, date, completed, created_at) VALUES (?1, ?2, 0, ?3)",
                params![data.title, data.date.to_string(), format_utc(&created_at)],
            )?;
            let task = Task {
                id: conn.last_insert_rowid(),
                title: data.title,
                date: data.date,
                completed: false,
                created_at,
                notification: None,
            };
            log::debug!("storage: created task_id={} date={}", task.id, task.date);
            Ok(task)
        })
        .await
    }

    /// Tasks for one date, newest first.
    pub async fn list_by_date(&self, date: NaiveDate) -> Result<Vec<Task>, StorageError> {
        self.run(move |conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE date = ?1 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![date.to_string()], read_row)?;
            collect_tasks(rows)
        })
        .await
    }

    /// Replaces the full record keyed by `task.id`.
    pub async fn update(&self, task: Task) -> Result<Task, StorageError> {
        self.run(move |conn| {
            let (time, scheduled_for) = match &task.notification {
                Some(reminder) => (
                    Some(reminder.time.clone()),
                    Some(reminder.scheduled_for.to_rfc3339()),
                ),
                None => (None, None),
            };
            let changed = conn.execute(
                "UPDATE tasks SET title = ?1, date = ?2, completed = ?3, created_at = ?4,
                    notification_time = ?5, notification_scheduled_for = ?6
                 WHERE id = ?7",
                params![
                    task.title,
                    task.date.to_string(),
                    task.completed,
                    format_utc(&task.created_at),
                    time,
                    scheduled_for,
                    task.id
                ],
            )?;
            if changed == 0 {
                return Err(StorageError::NotFound(task.id));
            }
            Ok(task)
        })
        .await
    }

    /// Removes the record; a missing id is not an error.
    pub async fn delete(&self, id: TaskId) -> Result<(), StorageError> {
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            log::debug!("storage: delete task_id={id} removed={removed}");
            Ok(())
        })
        .await
    }

    pub async fn get_by_id(&self, id: TaskId) -> Result<Option<Task>, StorageError> {
        self.run(move |conn| {
            let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1");
            let row = conn
                .query_row(&sql, params![id], read_row)
                .optional()?;
            row.map(TaskRow::into_task).transpose()
        })
        .await
    }

    /// Open tasks that carry a reminder.
    pub async fn list_with_live_notifications(&self) -> Result<Vec<Task>, StorageError> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 WHERE notification_scheduled_for IS NOT NULL AND completed = 0
                 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], read_row)?;
            collect_tasks(rows)
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.run(|conn| {
            conn.execute("DELETE FROM tasks", [])?;
            log::info!("storage: cleared all tasks");
            Ok(())
        })
        .await
    }

    async fn connection(&self) -> Result<&Mutex<Connection>, StorageError> {
        self.conn
            .get_or_try_init(|| async {
                let conn = open_connection(&self.location)?;
                Ok::<_, StorageError>(Mutex::new(conn))
            })
            .await
    }

    async fn run<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let cell = self.connection().await?;
        let mut guard = cell
            .lock()
            .map_err(|_| StorageError::Corrupt("connection lock poisoned".to_string()))?;
        op(&mut *guard)
    }
}

fn open_connection(location: &Location) -> Result<Connection, StorageError> {
    let mut conn = match location {
        Location::File(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path)?
        }
        Location::Memory => Connection::open_in_memory()?,
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let version = apply_migrations(&mut conn)?;
    match location {
        Location::File(path) => log::info!(
            "storage: opened path={} schema_version={version}",
            path.display()
        ),
        Location::Memory => log::info!("storage: opened in-memory schema_version={version}"),
    }
    Ok(conn)
}

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

fn apply_migrations(conn: &mut Connection) -> Result<u32, StorageError> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if current > latest {
        return Err(StorageError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if current == latest {
        return Ok(current);
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
        log::info!("storage: applied migration version={}", migration.version);
    }
    tx.commit()?;
    Ok(latest)
}

fn format_utc(at: &DateTime<Utc>) -> String {
    // Fixed-width UTC text keeps lexical order equal to chronological order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct TaskRow {
    id: TaskId,
    title: String,
    date: String,
    completed: bool,
    created_at: String,
    notification_time: Option<String>,
    notification_scheduled_for: Option<String>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        title: row.get(1)?,
        date: row.get(2)?,
        completed: row.get(3)?,
        created_at: row.get(4)?,
        notification_time: row.get(5)?,
        notification_scheduled_for: row.get(6)?,
    })
}

impl TaskRow {
    fn into_task(self) -> Result<Task, StorageError> {
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|err| {
            StorageError::Corrupt(format!("task {} date `{}`: {err}", self.id, self.date))
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| {
                StorageError::Corrupt(format!(
                    "task {} created_at `{}`: {err}",
                    self.id, self.created_at
                ))
            })?
            .with_timezone(&Utc);
        let notification = match (self.notification_time, self.notification_scheduled_for) {
            (Some(time), Some(scheduled_for)) => Some(Reminder {
                time,
                scheduled_for: DateTime::parse_from_rfc3339(&scheduled_for).map_err(|err| {
                    StorageError::Corrupt(format!(
                        "task {} scheduled_for `{scheduled_for}`: {err}",
                        self.id
                    ))
                })?,
            }),
            (None, None) => None,
            _ => {
                return Err(StorageError::Corrupt(format!(
                    "task {} has a half-written reminder",
                    self.id
                )))
            }
        };
        Ok(Task {
            id: self.id,
            title: self.title,
            date,
            completed: self.completed,
            created_at,
            notification,
        })
    }
}

fn collect_tasks(
    rows: impl Iterator<Item = rusqlite::Result<TaskRow>>,
) -> Result<Vec<Task>, StorageError> {
    let mut tasks = Vec::new();
    for row in rows {
        tasks.push(row?.into_task()?);
    }
    Ok(tasks)
}
