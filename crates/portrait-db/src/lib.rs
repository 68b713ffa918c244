pub mod builtin;
pub mod database;
pub mod ledger;
pub mod migrations;
pub mod user_store;

use chrono::{DateTime, NaiveDateTime, ParseResult, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

pub use database::{Database, DbOptions};
pub use ledger::LedgerEntry;
pub use migrations::{
    Migration, MigrationEvent, MigrationReport, MigrationState, MigrationStatus, MigrationStep,
    Migrator, Outcome, Registry, RolledBack,
};
pub use user_store::{UserProfile, UserStore};

/// Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` form ("YYYY-MM-DD HH:MM:SS", UTC).
pub(crate) fn parse_datetime(s: &str) -> ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
}

/// Read a text timestamp column, failing the row if it does not parse.
pub(crate) fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_rfc3339_and_sqlite_timestamps() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-03-01T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_datetime("2024-03-01 12:30:00").unwrap(), expected);
        assert!(parse_datetime("yesterday").is_err());
        assert!(parse_datetime("").is_err());
    }
}
