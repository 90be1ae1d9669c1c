//! SQLite database layer.
//!
//! Uses rusqlite with WAL mode. One schema serves both roles a database file
//! can play: the device-local draft store (`local_drafts`, `draft_refs`,
//! `local_settings`) and the SQLite-backed canonical order table (`orders`).

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{SyncError, SyncResult};

/// Shared handle holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    pub(crate) fn lock(&self) -> SyncResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncError::Storage(format!("database lock poisoned: {e}")))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/{file_name}`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path, file_name: &str) -> SyncResult<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| SyncError::Storage(format!("Failed to create data dir: {e}")))?;

    let db_path = data_dir.join(file_name);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path).map_err(|e| {
                SyncError::Storage(format!("Database open failed after retry: {e}"))
            })?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| SyncError::Storage(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migration_error(version: i32, e: rusqlite::Error) -> SyncError {
    error!("Migration v{version} failed: {e}");
    SyncError::Storage(format!("migration v{version}: {e}"))
}

/// Migration v1: settings store.
fn migrate_v1(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| migration_error(1, e))?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: local drafts and the references left behind by synced sales.
fn migrate_v2(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_drafts (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('sale', 'hold')),
            payload TEXT NOT NULL,
            pending_sync INTEGER NOT NULL DEFAULT 1,
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            next_retry_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS draft_refs (
            order_id TEXT PRIMARY KEY,
            total INTEGER NOT NULL,
            synced_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_local_drafts_pending ON local_drafts(pending_sync, next_retry_at);
        CREATE INDEX IF NOT EXISTS idx_local_drafts_kind ON local_drafts(kind);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| migration_error(2, e))?;

    info!("Applied migration v2 (local_drafts)");
    Ok(())
}

/// Migration v3: canonical orders table for the SQLite-backed store.
fn migrate_v3(conn: &Connection) -> SyncResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            paid INTEGER NOT NULL DEFAULT 0,
            payment_method TEXT,
            customer_name TEXT NOT NULL DEFAULT '',
            order_type TEXT NOT NULL DEFAULT 'dine-in',
            status TEXT NOT NULL DEFAULT 'PENDING'
                CHECK (status IN ('PENDING', 'PREPARING', 'READY', 'COMPLETED', 'CANCELLED')),
            items TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| migration_error(3, e))?;

    info!("Applied migration v3 (orders)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a single setting.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> SyncResult<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| SyncError::Storage(format!("set_setting: {e}")))?;
    Ok(())
}

pub fn delete_all_settings(conn: &Connection, category: &str) -> SyncResult<()> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1",
        params![category],
    )
    .map_err(|e| SyncError::Storage(format!("delete_all_settings: {e}")))?;
    Ok(())
}

/// Next human-readable order id (`POS-0001`, `POS-0002`, ...).
///
/// The counter lives in `local_settings` (category `orders`, key
/// `order_counter`) and is read and bumped under the caller's connection
/// lock.
pub fn next_order_number(conn: &Connection, prefix: &str) -> SyncResult<String> {
    let current: i64 = get_setting(conn, "orders", "order_counter")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    let next = current + 1;
    set_setting(conn, "orders", "order_counter", &next.to_string())?;

    Ok(format!("{prefix}-{next:04}"))
}

/// In-memory database with every migration applied.
#[cfg(test)]
pub(crate) fn test_db() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
