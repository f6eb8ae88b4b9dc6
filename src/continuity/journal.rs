/*!
 * Append-only SQLite journal of carryover events.
 *
 * Every put, consume, miss and eviction is written as one row so a run
 * can be replayed after the fact. The journal is never read back by the
 * pipeline itself.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

const DEFAULT_JOURNAL_FILENAME: &str = "carryover.db";
const DEFAULT_JOURNAL_DIRNAME: &str = "inkbridge";

/// Kind of carryover event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEvent {
    Put,
    Consume,
    Miss,
    Expire,
    Evict,
}

impl JournalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Consume => "consume",
            Self::Miss => "miss",
            Self::Expire => "expire",
            Self::Evict => "evict",
        }
    }
}

/// One journal row
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub event: String,
    pub pair_id: String,
    pub page_id: Option<String>,
    pub text: Option<String>,
}

/// SQLite-backed carryover journal
#[derive(Clone)]
pub struct CarryoverJournal {
    path: PathBuf,
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for CarryoverJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarryoverJournal").field("path", &self.path).finish()
    }
}

impl CarryoverJournal {
    /// Open or create a journal file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory: {:?}", parent))?;
        }

        info!("Opening carryover journal at: {:?}", path);
        let conn = Connection::open(&path).with_context(|| format!("Failed to open journal: {:?}", path))?;
        initialize_schema(&conn)?;

        Ok(Self {
            path,
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory journal, used by tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory journal")?;
        initialize_schema(&conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// `<data dir>/inkbridge/carryover.db`
    pub fn default_path() -> Result<PathBuf> {
        let base_dir = dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(base_dir.join(DEFAULT_JOURNAL_DIRNAME).join(DEFAULT_JOURNAL_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event
    pub fn append(&self, event: JournalEvent, pair_id: &str, page_id: Option<&str>, text: Option<&str>) -> Result<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO carryover_events (event, pair_id, page_id, text, recorded_at)
             VALUES (?1, ?2, ?3, ?4, datetime('now'))",
            params![event.as_str(), pair_id, page_id, text],
        )
        .with_context(|| format!("Failed to journal {} for pair {}", event.as_str(), pair_id))?;
        Ok(())
    }

    /// Events for one pair in insertion order
    pub fn events_for(&self, pair_id: &str) -> Result<Vec<JournalRecord>> {
        let conn = self.connection.lock();
        let mut stmt = conn.prepare(
            "SELECT event, pair_id, page_id, text FROM carryover_events WHERE pair_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([pair_id], |row| {
            Ok(JournalRecord {
                event: row.get(0)?,
                pair_id: row.get(1)?,
                page_id: row.get(2)?,
                text: row.get(3)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read journal events")
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.connection.lock();
        conn.query_row("SELECT COUNT(*) FROM carryover_events", [], |row| row.get(0))
            .context("Failed to count journal events")
    }
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    let current_version = schema_version(conn)?;
    if current_version == 0 {
        info!("Initializing carryover journal schema v{}", SCHEMA_VERSION);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS carryover_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event TEXT NOT NULL,
                pair_id TEXT NOT NULL,
                page_id TEXT,
                text TEXT,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_carryover_events_pair ON carryover_events(pair_id);",
        )
        .context("Failed to create journal tables")?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version, updated_at) VALUES (1, ?1, datetime('now'))",
            [SCHEMA_VERSION],
        )?;
    } else {
        debug!("Carryover journal schema is v{}", current_version);
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .context("Failed to check schema_version table existence")?;
    if !table_exists {
        return Ok(0);
    }
    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);
    Ok(version)
}
