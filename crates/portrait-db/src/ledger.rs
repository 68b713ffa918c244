//! The `migrations` ledger table: one row per applied migration version.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use portrait_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::datetime_column;

/// A persisted ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub version: u32,
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

/// Create the ledger table if it does not exist yet.
pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            version INTEGER NOT NULL UNIQUE,
            name TEXT NOT NULL,
            executed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migration ledger: {e}")))
}

pub fn applied_versions(conn: &Connection) -> Result<HashSet<u32>> {
    let mut stmt = conn
        .prepare("SELECT version FROM migrations")
        .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

    let mut versions = HashSet::new();
    for row in rows {
        versions.insert(
            row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?,
        );
    }
    Ok(versions)
}

pub fn contains(conn: &Connection, version: u32) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM migrations WHERE version = ?1",
        params![version],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to check ledger: {e}")))
}

/// All ledger rows in ascending version order.
pub fn entries(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn
        .prepare("SELECT id, version, name, executed_at FROM migrations ORDER BY version ASC")
        .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

    let rows = stmt
        .query_map([], map_entry)
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?);
    }
    Ok(entries)
}

/// The row with the highest version, if any migration has been applied.
pub fn latest(conn: &Connection) -> Result<Option<LedgerEntry>> {
    conn.query_row(
        "SELECT id, version, name, executed_at FROM migrations ORDER BY version DESC LIMIT 1",
        [],
        map_entry,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to read latest ledger row: {e}")))
}

/// Append a row. Callers run this inside the transaction that applied the
/// migration so both commit or neither does.
pub fn record(conn: &Connection, version: u32, name: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO migrations (version, name, executed_at) VALUES (?1, ?2, ?3)",
        params![version, name, at.to_rfc3339()],
    )
    .map_err(|e| Error::Database(format!("failed to record migration {version}: {e}")))?;
    Ok(())
}

/// Delete the row for `version`, returning the number of rows removed.
pub(crate) fn remove(conn: &Connection, version: u32) -> Result<usize> {
    conn.execute("DELETE FROM migrations WHERE version = ?1", params![version])
        .map_err(|e| Error::Database(format!("failed to remove ledger row {version}: {e}")))
}

fn map_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        version: row.get(1)?,
        name: row.get(2)?,
        executed_at: datetime_column(row, 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_table(&conn).unwrap();
        conn
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let conn = ledger_conn();
        ensure_table(&conn).unwrap();
        assert!(applied_versions(&conn).unwrap().is_empty());
    }

    #[test]
    fn record_and_read_back() {
        let conn = ledger_conn();
        record(&conn, 2, "add_phone", Utc::now()).unwrap();
        record(&conn, 1, "add_profile_picture", Utc::now()).unwrap();

        let entries = entries(&conn).unwrap();
        let versions: Vec<u32> = entries.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(entries[0].name, "add_profile_picture");

        assert!(contains(&conn, 2).unwrap());
        assert!(!contains(&conn, 3).unwrap());
        assert_eq!(latest(&conn).unwrap().unwrap().version, 2);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let conn = ledger_conn();
        record(&conn, 1, "first", Utc::now()).unwrap();
        let err = record(&conn, 1, "again", Utc::now()).unwrap_err();
        assert!(err.to_string().contains("UNIQUE"));
        assert_eq!(entries(&conn).unwrap().len(), 1);
    }

    #[test]
    fn remove_deletes_exactly_one_row() {
        let conn = ledger_conn();
        record(&conn, 1, "a", Utc::now()).unwrap();
        record(&conn, 2, "b", Utc::now()).unwrap();

        assert_eq!(remove(&conn, 2).unwrap(), 1);
        assert_eq!(remove(&conn, 2).unwrap(), 0);
        assert_eq!(applied_versions(&conn).unwrap(), HashSet::from([1]));
    }

    #[test]
    fn latest_on_empty_ledger_is_none() {
        let conn = ledger_conn();
        assert!(latest(&conn).unwrap().is_none());
    }

    #[test]
    fn default_timestamp_parses() {
        let conn = ledger_conn();
        conn.execute(
            "INSERT INTO migrations (version, name) VALUES (5, 'manual')",
            [],
        )
        .unwrap();
        let entry = latest(&conn).unwrap().unwrap();
        assert_eq!(entry.version, 5);
        assert!(entry.executed_at <= Utc::now());
    }

    #[test]
    fn unreadable_timestamp_is_an_error() {
        let conn = ledger_conn();
        record(&conn, 1, "a", Utc::now()).unwrap();
        conn.execute(
            "INSERT INTO migrations (version, name, executed_at) VALUES (2, 'b', 'garbage')",
            [],
        )
        .unwrap();

        let err = entries(&conn).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert!(latest(&conn).is_err());
        // The version set does not read timestamps.
        assert_eq!(applied_versions(&conn).unwrap(), HashSet::from([1, 2]));
    }
}
