//! Schema migrations
//!
//! The base schema (version 1) is created with `CREATE TABLE IF NOT EXISTS`.
//! Everything after that is a registered, forward-only [`Migration`] recorded
//! in the `migrations` table once applied. Each `apply` is idempotent at the
//! schema level: column additions probe `pragma_table_info` first, so a
//! database that already has a column (e.g. created by an older build that
//! skipped the record) upgrades cleanly.

use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Version of the base schema, before any registered migration
pub const BASE_SCHEMA_VERSION: u32 = 1;

/// Tables that exist before any migration runs
pub(crate) const BASE_SCHEMA: &str = r#"
    -- Receipts (capture metadata; OCR columns arrive via 001_add_ocr_fields)
    CREATE TABLE IF NOT EXISTS receipts (
        id INTEGER PRIMARY KEY,
        filename TEXT NOT NULL,
        file_path TEXT NOT NULL UNIQUE,
        remote_path TEXT,
        payment_method TEXT NOT NULL DEFAULT 'cash' CHECK (payment_method IN ('cash', 'card')),
        card_label TEXT,
        captured_at DATETIME NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        year TEXT NOT NULL,
        month TEXT NOT NULL,
        upload_status TEXT NOT NULL DEFAULT 'pending'
            CHECK (upload_status IN ('pending', 'uploading', 'success', 'failed'))
    );

    -- Key/value settings (opaque string values)
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    -- Applied migrations, append-only
    CREATE TABLE IF NOT EXISTS migrations (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        applied_at DATETIME NOT NULL,
        version INTEGER NOT NULL
    );
"#;

/// What to do when a migration's `apply` fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationMode {
    /// Roll the failed migration back and fail the open with `MigrationFailed`
    #[default]
    Strict,
    /// Roll the failed migration back, log it, and continue with the next one
    Lenient,
}

/// A registered schema change
#[derive(Clone, Copy)]
pub struct Migration {
    /// Stable identifier recorded in the `migrations` table
    pub id: &'static str,
    pub name: &'static str,
    /// Schema version reached once applied
    pub version: u32,
    pub apply: fn(&Connection) -> rusqlite::Result<()>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish()
    }
}

/// Every migration, in application order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "001_add_ocr_fields",
        name: "Add OCR fields to receipts",
        version: 2,
        apply: add_ocr_fields,
    },
    Migration {
        id: "002_add_upload_queue",
        name: "Add durable upload queue",
        version: 3,
        apply: add_upload_queue,
    },
    Migration {
        id: "003_add_remote_tracking",
        name: "Track remote id and url of uploaded receipts",
        version: 4,
        apply: add_remote_tracking,
    },
    Migration {
        id: "004_add_receipt_indexes",
        name: "Index receipts for list filters",
        version: 5,
        apply: add_receipt_indexes,
    },
];

/// Whether `table` has a column named `column`
pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?) WHERE name = ?)",
        params![table, column],
        |row| row.get(0),
    )
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    definition: &str,
) -> rusqlite::Result<()> {
    if !column_exists(conn, table, column)? {
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            table, column, definition
        ))?;
    }
    Ok(())
}

fn add_ocr_fields(conn: &Connection) -> rusqlite::Result<()> {
    const COLUMNS: &[(&str, &str)] = &[
        ("vendor_name", "TEXT"),
        ("total_amount", "REAL"),
        ("tax_amount", "REAL"),
        ("invoice_number", "TEXT"),
        ("category", "TEXT"),
        ("currency", "TEXT NOT NULL DEFAULT 'USD'"),
        ("receipt_date", "DATE"),
        ("raw_ocr_text", "TEXT"),
        ("ocr_confidence", "REAL"),
        ("field_confidences", "TEXT"),
        ("extracted_at", "DATETIME"),
    ];
    for (column, definition) in COLUMNS {
        add_column_if_missing(conn, "receipts", column, definition)?;
    }
    Ok(())
}

fn add_upload_queue(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS upload_queue (
            id INTEGER PRIMARY KEY,
            local_path TEXT NOT NULL,
            remote_path TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_attempt_at DATETIME NOT NULL,
            state TEXT NOT NULL DEFAULT 'pending'
                CHECK (state IN ('pending', 'in_flight', 'failed')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(local_path, remote_path)
        );

        CREATE INDEX IF NOT EXISTS idx_upload_queue_ready ON upload_queue(state, next_attempt_at);
        "#,
    )
}

fn add_remote_tracking(conn: &Connection) -> rusqlite::Result<()> {
    add_column_if_missing(conn, "receipts", "remote_id", "TEXT")?;
    add_column_if_missing(conn, "receipts", "remote_url", "TEXT")
}

fn add_receipt_indexes(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_receipts_captured ON receipts(captured_at);
        CREATE INDEX IF NOT EXISTS idx_receipts_upload_status ON receipts(upload_status);
        CREATE INDEX IF NOT EXISTS idx_receipts_year_month ON receipts(year, month);
        "#,
    )
}

/// Apply every registered migration not yet recorded
///
/// Each migration runs in its own `IMMEDIATE` transaction, which doubles as
/// the advisory lock: two processes opening the same file serialize here and
/// the second one sees the first one's record. Returns the ids applied.
pub(crate) fn run_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
    mode: MigrationMode,
    applied_at: &str,
) -> Result<Vec<String>> {
    let mut applied = Vec::new();

    for migration in migrations {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let already: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM migrations WHERE id = ?)",
            params![migration.id],
            |row| row.get(0),
        )?;
        if already {
            continue;
        }

        let outcome = (migration.apply)(&tx).and_then(|()| {
            tx.execute(
                "INSERT INTO migrations (id, name, applied_at, version) VALUES (?, ?, ?, ?)",
                params![migration.id, migration.name, applied_at, migration.version],
            )
            .map(|_| ())
        });

        match outcome {
            Ok(()) => {
                tx.commit()?;
                info!(
                    "Applied migration {} (schema v{})",
                    migration.id, migration.version
                );
                applied.push(migration.id.to_string());
            }
            Err(e) => {
                // Dropping the transaction rolls the partial migration back
                drop(tx);
                match mode {
                    MigrationMode::Strict => {
                        return Err(Error::MigrationFailed {
                            id: migration.id.to_string(),
                            cause: e.to_string(),
                        });
                    }
                    MigrationMode::Lenient => {
                        warn!("Migration {} failed, continuing: {}", migration.id, e);
                    }
                }
            }
        }
    }

    Ok(applied)
}
