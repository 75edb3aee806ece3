//! Run ledger: which app versions were tested, and their capture runs

use crate::types::{AppRecord, RunRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Persistent record of tested apps and capture runs.
pub trait RunLedger: Send + Sync {
    /// Record a new app version, returning its id.
    fn insert_app(&self, name: &str, version: &str) -> Result<i64>;

    /// Record the start of a capture run for `app_id`, returning its id.
    fn insert_run(&self, app_id: i64) -> Result<i64>;

    /// Whether `(name, version)` already has an app record.
    fn app_already_done(&self, name: &str, version: &str) -> Result<bool>;

    /// Remove an app record together with its runs.
    fn delete_app(&self, app_id: i64) -> Result<bool>;

    fn list_apps(&self) -> Result<Vec<AppRecord>>;

    fn runs_for_app(&self, app_id: i64) -> Result<Vec<RunRecord>>;
}

/// SQLite-backed [`RunLedger`]
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open or create the ledger at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.init_schema()?;

        info!("Opened run ledger at {:?}", path.as_ref());
        Ok(ledger)
    }

    /// Open an existing ledger for reading only; nothing is created.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        debug!("Opened run ledger read-only at {:?}", path.as_ref());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory ledger (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let ledger = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.init_schema()?;
        Ok(ledger)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS apps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                UNIQUE (name, version)
            );

            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time TEXT NOT NULL,
                app INTEGER NOT NULL REFERENCES apps(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_runs_app ON runs(app);
            "#,
        )?;

        debug!("Ledger schema initialized");
        Ok(())
    }
}

impl RunLedger for SqliteLedger {
    fn insert_app(&self, name: &str, version: &str) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO apps (name, version) VALUES (?1, ?2)",
            params![name, version],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Inserted app {}@{} with id {}", name, version, id);
        Ok(id)
    }

    fn insert_run(&self, app_id: i64) -> Result<i64> {
        let conn = self.conn.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO runs (start_time, app) VALUES (?1, ?2)",
            params![now.to_rfc3339(), app_id],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Inserted run {} for app {}", id, app_id);
        Ok(id)
    }

    fn app_already_done(&self, name: &str, version: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM apps WHERE name = ?1 AND version = ?2",
            params![name, version],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn delete_app(&self, app_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM apps WHERE id = ?1", params![app_id])?;

        if rows > 0 {
            debug!("Deleted app with id {}", app_id);
        }
        Ok(rows > 0)
    }

    fn list_apps(&self) -> Result<Vec<AppRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, name, version FROM apps ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(AppRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                version: row.get(2)?,
            })
        })?;

        let mut apps = Vec::new();
        for row in rows {
            apps.push(row?);
        }
        Ok(apps)
    }

    fn runs_for_app(&self, app_id: i64) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, start_time, app FROM runs WHERE app = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![app_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, start_time, app_id) = row?;
            let start_time = DateTime::parse_from_rfc3339(&start_time)
                .map_err(|e| crate::Error::Internal(format!("bad run start_time: {}", e)))?
                .with_timezone(&Utc);
            runs.push(RunRecord {
                id,
                start_time,
                app_id,
            });
        }
        Ok(runs)
    }
}
