use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use portrait_common::{Error, Result};
use rusqlite::{Connection, params};
use tracing::info;

use crate::ledger;
use crate::migrations::{MigrationReport, MigrationStatus, Migrator, Registry, RolledBack};

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Connection settings applied when the database is opened.
#[derive(Debug, Clone)]
pub struct DbOptions {
    pub journal_mode: String,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            journal_mode: "WAL".to_string(),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// The application's SQLite database.
///
/// Opening it creates the base `users` table and the migration ledger; the
/// owner then runs migrations to bring the schema to the latest version.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(db_path: &Path, options: &DbOptions) -> Result<Self> {
        info!("opening database at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
        Self::bootstrap(conn, options)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;
        Self::bootstrap(conn, &DbOptions::default())
    }

    fn bootstrap(conn: Connection, options: &DbOptions) -> Result<Self> {
        let mode = options.journal_mode.to_ascii_uppercase();
        if !JOURNAL_MODES.contains(&mode.as_str()) {
            return Err(Error::Database(format!(
                "unsupported journal mode: {}",
                options.journal_mode
            )));
        }

        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| Error::Database(format!("failed to set busy timeout: {e}")))?;
        conn.execute_batch(&format!("PRAGMA journal_mode={mode}; PRAGMA foreign_keys=ON;"))
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT UNIQUE NOT NULL,
                password TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );",
        )
        .map_err(|e| Error::Database(format!("failed to create base schema: {e}")))?;
        ledger::ensure_table(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("database lock poisoned".into()))
    }

    /// Apply all pending migrations from `registry`.
    pub fn migrate(&self, registry: &Registry) -> Result<MigrationReport> {
        let mut conn = self.connection()?;
        Migrator::new(registry).run(&mut conn)
    }

    /// Roll back the most recently applied migration.
    pub fn rollback_last(&self, registry: &Registry) -> Result<Option<RolledBack>> {
        let mut conn = self.connection()?;
        Migrator::new(registry).rollback_last(&mut conn)
    }

    pub fn migration_status(&self, registry: &Registry) -> Result<Vec<MigrationStatus>> {
        let conn = self.connection()?;
        Migrator::new(registry).status(&conn)
    }

    /// Column names of `table` in declaration order.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query columns: {e}")))?;

        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.map_err(|e| Error::Database(format!("failed to read column: {e}")))?);
        }
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    #[test]
    fn bootstrap_creates_users_and_ledger() {
        let db = Database::in_memory().unwrap();
        assert_eq!(
            db.table_columns("users").unwrap(),
            vec!["id", "name", "email", "password", "created_at"]
        );
        assert_eq!(
            db.table_columns("migrations").unwrap(),
            vec!["id", "version", "name", "executed_at"]
        );
    }

    #[test]
    fn rejects_unknown_journal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let options = DbOptions {
            journal_mode: "wal; DROP TABLE users".into(),
            ..Default::default()
        };
        let err = Database::open(&dir.path().join("db.sqlite"), &options)
            .err()
            .unwrap();
        assert!(err.to_string().contains("unsupported journal mode"));
    }

    #[test]
    fn reopening_file_keeps_migrations_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("database.db");
        let registry = builtin::registry().unwrap();

        {
            let db = Database::open(&path, &DbOptions::default()).unwrap();
            assert_eq!(db.migrate(&registry).unwrap().applied_versions(), vec![1, 2]);
        }

        let db = Database::open(&path, &DbOptions::default()).unwrap();
        let report = db.migrate(&registry).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.events.len(), 2);
    }
}
