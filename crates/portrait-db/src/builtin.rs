//! Migrations compiled into the application.

use portrait_common::Result;
use rusqlite::Connection;

use crate::migrations::{Migration, MigrationStep, Registry};

pub const ADD_PROFILE_PICTURE: u32 = 1;
pub const ADD_PHONE: u32 = 2;

pub fn migrations() -> Vec<Migration> {
    vec![
        Migration::new(
            ADD_PROFILE_PICTURE,
            "add_profile_picture",
            MigrationStep::Func(add_profile_picture),
        ),
        Migration::new(
            ADD_PHONE,
            "add_phone",
            MigrationStep::sql("ALTER TABLE users ADD COLUMN phone TEXT;"),
        )
        .with_down(MigrationStep::sql("ALTER TABLE users DROP COLUMN phone;")),
    ]
}

pub fn registry() -> Result<Registry> {
    Registry::new(migrations())
}

// Databases created before the ledger existed may already carry the column.
fn add_profile_picture(conn: &Connection) -> rusqlite::Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('users') WHERE name = 'profile_picture'",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        conn.execute_batch("ALTER TABLE users ADD COLUMN profile_picture TEXT;")?;
    }
    Ok(())
}
