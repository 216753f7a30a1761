//! Transactional pending queue on SQLite.
//!
//! All queues share one database file; each queue owns a table named after
//! the queue (`comments.pending`) keyed by the canonical id. The database is
//! opened on a blocking thread right after construction, and every operation
//! waits on the readiness signal before touching it.
//!
//! Within a process, queues on the same file share a single connection, so
//! opening several queues at once never contends for the file lock. Schema
//! setup and writes take the write lock up front (`BEGIN IMMEDIATE`), which
//! lets the busy timeout cover other processes holding the file.
//!
//! Writes run inside their own transaction and return only after commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use tracing::{debug, error, info};

use super::readiness::{readiness, ReadinessSignal};
use super::QueueError;
use crate::domain::{Item, ItemId};

/// Schema version recorded in `PRAGMA user_version`
const SCHEMA_VERSION: i64 = 1;

/// How long a writer waits on a lock held by another connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type SharedConnection = Arc<Mutex<Connection>>;

/// Open connections by database file, dropped with their last queue
static CONNECTIONS: OnceLock<Mutex<HashMap<PathBuf, Weak<Mutex<Connection>>>>> = OnceLock::new();

/// Pending queue stored as a table in a shared SQLite database
#[derive(Clone)]
pub struct TransactionalQueue {
    /// Queue (and table) name
    name: String,

    /// Database file
    database_path: PathBuf,

    /// Set once, right before readiness resolves to ready
    conn: Arc<OnceLock<SharedConnection>>,

    readiness: ReadinessSignal,
}

impl TransactionalQueue {
    /// Start opening the database and return immediately.
    ///
    /// Must be called from within a Tokio runtime. Operations issued before
    /// the open finishes wait for it; if it fails they all return
    /// [`QueueError::BackendInit`].
    pub fn open(name: impl Into<String>, database_path: &Path) -> Self {
        let name = name.into();
        let database_path = database_path.to_path_buf();
        let conn: Arc<OnceLock<SharedConnection>> = Arc::new(OnceLock::new());
        let (setter, signal) = readiness();

        let task_conn = Arc::clone(&conn);
        let task_name = name.clone();
        let task_path = database_path.clone();
        tokio::task::spawn_blocking(move || match open_database(&task_path, &task_name) {
            Ok(connection) => {
                let _ = task_conn.set(connection);
                info!(queue = %task_name, path = %task_path.display(), "Opened transactional queue");
                setter.ready();
            }
            Err(e) => {
                error!(queue = %task_name, path = %task_path.display(), "Failed to open transactional queue: {}", e);
                setter.fail(e.to_string());
            }
        });

        Self {
            name,
            database_path,
            conn,
            readiness: signal,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Wait for the database open to finish
    pub async fn ready(&self) -> Result<(), QueueError> {
        self.readiness.wait().await
    }

    pub async fn get_all(&self) -> Result<Vec<Item>, QueueError> {
        let name = self.name.clone();
        self.with_conn(move |conn, table| {
            let mut stmt = conn.prepare(&format!("SELECT record FROM {} ORDER BY rowid", table))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut records = Vec::new();
            for raw in rows {
                let raw = raw?;
                let record = serde_json::from_str(&raw).map_err(|source| QueueError::Corrupted {
                    name: name.clone(),
                    source,
                })?;
                records.push(record);
            }

            Ok(records)
        })
        .await
    }

    pub async fn add(&self, mut record: Item) -> Result<ItemId, QueueError> {
        let id = record.ensure_id();
        let key = id.key();
        let raw = serde_json::to_string(&record)?;

        self.with_conn(move |conn, table| {
            let tx = begin_write(conn)?;
            tx.execute(
                &format!("INSERT INTO {} (id, record) VALUES (?1, ?2)", table),
                params![key, raw],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await?;

        debug!(queue = %self.name, %id, "Queued record");
        Ok(id)
    }

    pub async fn delete_by_id(&self, id: &ItemId) -> Result<(), QueueError> {
        let key = id.key();
        let removed = self
            .with_conn(move |conn, table| {
                let tx = begin_write(conn)?;
                let removed = tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![key])?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            debug!(queue = %self.name, %id, "Removed record");
        }
        Ok(())
    }

    pub async fn delete_first_without_id(&self) -> Result<(), QueueError> {
        self.with_conn(|conn, table| {
            let tx = begin_write(conn)?;
            let target = {
                let mut stmt =
                    tx.prepare(&format!("SELECT rowid, record FROM {} ORDER BY rowid", table))?;
                let mut rows = stmt.query([])?;
                let mut target = None;
                while let Some(row) = rows.next()? {
                    let raw: String = row.get(1)?;
                    let unidentified = serde_json::from_str::<Item>(&raw)
                        .map_or(false, |record| record.id().is_none());
                    if unidentified {
                        target = Some(row.get::<_, i64>(0)?);
                        break;
                    }
                }
                target
            };

            if let Some(rowid) = target {
                tx.execute(&format!("DELETE FROM {} WHERE rowid = ?1", table), params![rowid])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn clear(&self) -> Result<(), QueueError> {
        self.with_conn(|conn, table| {
            let tx = begin_write(conn)?;
            tx.execute(&format!("DELETE FROM {}", table), [])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Run `f` against the connection on a blocking thread, once ready
    async fn with_conn<F, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Connection, &str) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        self.readiness.wait().await?;

        let cell = Arc::clone(&self.conn);
        let table = quote_identifier(&self.name);
        tokio::task::spawn_blocking(move || {
            let conn = cell.get().ok_or_else(|| {
                QueueError::BackendInit("connection missing after readiness".to_string())
            })?;
            let mut conn = conn
                .lock()
                .map_err(|_| QueueError::BackendInit("connection lock poisoned".to_string()))?;
            f(&mut conn, &table)
        })
        .await?
    }
}

/// Get the shared connection for `path` and run the upgrade step for `table`
fn open_database(path: &Path, table: &str) -> Result<SharedConnection, QueueError> {
    let shared = shared_connection(path)?;
    {
        let mut conn = shared
            .lock()
            .map_err(|_| QueueError::BackendInit("connection lock poisoned".to_string()))?;
        ensure_table(&mut conn, table)?;
    }
    Ok(shared)
}

/// Reuse the live connection to `path`, or open one.
///
/// The registry lock is held across the open so two queues racing on a fresh
/// file never both run the WAL switch.
fn shared_connection(path: &Path) -> Result<SharedConnection, QueueError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let key = registry_key(path);
    let registry = CONNECTIONS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut registry = registry
        .lock()
        .map_err(|_| QueueError::BackendInit("connection registry poisoned".to_string()))?;

    if let Some(existing) = registry.get(&key).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    let shared = Arc::new(Mutex::new(connect(path)?));
    registry.retain(|_, conn| conn.strong_count() > 0);
    registry.insert(key, Arc::downgrade(&shared));
    Ok(shared)
}

/// Absolute form of `path`, so spellings of one file share an entry
fn registry_key(path: &Path) -> PathBuf {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(dir), path.file_name()) {
        (Ok(dir), Some(file)) => dir.join(file),
        _ => path.to_path_buf(),
    }
}

/// Open a fresh connection with the busy timeout and WAL journal set
fn connect(path: &Path) -> Result<Connection, QueueError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Start a transaction holding the write lock from its first statement
fn begin_write(conn: &mut Connection) -> Result<Transaction<'_>, QueueError> {
    Ok(conn.transaction_with_behavior(TransactionBehavior::Immediate)?)
}

/// Record the schema version and create `table` if missing
fn ensure_table(conn: &mut Connection, table: &str) -> Result<(), QueueError> {
    let tx = begin_write(conn)?;
    let version: i64 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < SCHEMA_VERSION {
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY NOT NULL,
            record TEXT NOT NULL
        );",
        quote_identifier(table)
    ))?;
    tx.commit()?;

    Ok(())
}

/// Quote a table name so dots and quotes are taken literally
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
