//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `migrations` - Base schema, registered migrations and the runner
//! - `receipts` - Receipt CRUD, OCR patches and upload status
//! - `receipt_filter` - Dynamic WHERE clauses for receipt listing
//! - `settings` - Key/value settings and typed helpers
//! - `upload_queue` - Durable upload queue rows

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::clock::{format_db_timestamp, system_clock, SharedClock};
use crate::error::{Error, Result};
use crate::models::MigrationRecord;

mod migrations;
mod receipt_filter;
mod receipts;
mod settings;
mod upload_queue;

pub use migrations::{Migration, MigrationMode, BASE_SCHEMA_VERSION, MIGRATIONS};
pub use receipt_filter::{FilterResult, ReceiptFilter};
pub use settings::{keys, RemoteCredentials};

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
    clock: SharedClock,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open (or create) the database with the system clock and strict migrations
    pub fn new(path: &str) -> Result<Self> {
        Self::open(path, system_clock(), MigrationMode::Strict)
    }

    /// Open (or create) the database and apply pending migrations
    ///
    /// Fails with `StorageUnavailable` when the file cannot be opened and with
    /// `MigrationFailed` when a migration fails in strict mode.
    pub fn open(path: &str, clock: SharedClock, mode: MigrationMode) -> Result<Self> {
        Self::open_with_migrations(path, clock, mode, MIGRATIONS)
    }

    pub(crate) fn open_with_migrations(
        path: &str,
        clock: SharedClock,
        mode: MigrationMode,
        migrations: &[Migration],
    ) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(Error::StorageUnavailable(format!(
                    "{}: directory {} does not exist",
                    path,
                    parent.display()
                )));
            }
        }

        // Probe once so an unopenable path is reported as such, not as a pool timeout
        Connection::open(path)
            .and_then(|conn| conn.execute_batch("SELECT 1;"))
            .map_err(|e| Error::StorageUnavailable(format!("{}: {}", path, e)))?;

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| Error::StorageUnavailable(format!("{}: {}", path, e)))?;

        let db = Self {
            pool,
            db_path: path.to_string(),
            clock,
        };
        db.initialize(migrations, mode)?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because every
    /// pooled connection to `:memory:` would see its own empty database.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_clock(system_clock())
    }

    /// Create a throwaway database driven by the given clock
    pub fn in_memory_with_clock(clock: SharedClock) -> Result<Self> {
        let path = Self::scratch_path();
        Self::open(&path, clock, MigrationMode::Strict)
    }

    pub(crate) fn scratch_path() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "keeper_test_{}_{}.db",
            std::process::id(),
            id
        ));

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        path.to_string_lossy().into_owned()
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// The clock this handle stamps rows with
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Current time formatted for storage
    pub(crate) fn now_str(&self) -> String {
        format_db_timestamp(self.clock.now())
    }

    fn initialize(&self, migrations: &[Migration], mode: MigrationMode) -> Result<()> {
        let mut conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- WAL mode: readers don't block the single writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        conn.execute_batch(migrations::BASE_SCHEMA)?;

        let applied = migrations::run_migrations(&mut conn, migrations, mode, &self.now_str())?;
        if applied.is_empty() {
            debug!("Database {} is up to date", self.db_path);
        } else {
            info!(
                "Database {} migrated to schema v{} ({} applied)",
                self.db_path,
                self.schema_version()?,
                applied.len()
            );
        }
        Ok(())
    }

    /// Highest applied schema version (1 when only the base schema exists)
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        let version: Option<u32> = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(version.unwrap_or(BASE_SCHEMA_VERSION))
    }

    /// Applied migrations, oldest first
    pub fn list_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, applied_at, version FROM migrations ORDER BY version ASC, id ASC",
        )?;

        let records = stmt
            .query_map([], |row| {
                let applied_at: String = row.get(2)?;
                Ok(MigrationRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    applied_at: parse_datetime(&applied_at),
                    version: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests;
