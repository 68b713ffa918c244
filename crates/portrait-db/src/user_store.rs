use std::sync::Arc;

use chrono::{DateTime, Utc};
use portrait_common::{Error, Result};
use portrait_security::{CredentialHasher, InputValidator};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::Database;
use crate::datetime_column;

const PROFILE_COLUMNS: &str = "id, name, email, profile_picture, phone, created_at";

/// A user as exposed to callers. Never carries the credential hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub profile_picture: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Accounts and profile data over the `users` table.
///
/// Expects the schema at the latest built-in migration.
pub struct UserStore {
    db: Arc<Database>,
    hasher: Arc<dyn CredentialHasher>,
}

impl UserStore {
    pub fn new(db: Arc<Database>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self { db, hasher }
    }

    /// Create an account and return its id.
    pub fn register(&self, name: &str, email: &str, password: &str) -> Result<i64> {
        // Validate what will be stored: a name of only control characters is empty.
        let name = InputValidator::sanitize(name);
        let name = name.trim();
        InputValidator::validate_registration(name, email, password)?;
        let email = email.trim();

        if self.email_exists(email)? {
            return Err(Error::Conflict("email already registered".into()));
        }

        // Hash before taking the connection lock.
        let hash = self.hasher.hash(password)?;

        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO users (name, email, password) VALUES (?1, ?2, ?3)",
            params![name, email, hash],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => {
                Error::Conflict("email already registered".into())
            }
            _ => Error::Database(format!("failed to register user: {e}")),
        })?;

        let id = conn.last_insert_rowid();
        info!("registered user {id}");
        Ok(id)
    }

    /// Check credentials. Unknown email and wrong password both yield `None`.
    pub fn login(&self, email: &str, password: &str) -> Result<Option<UserProfile>> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation("email and password are required".into()));
        }

        let found = {
            let conn = self.db.connection()?;
            conn.query_row(
                &format!("SELECT {PROFILE_COLUMNS}, password FROM users WHERE email = ?1"),
                params![email.trim()],
                |row| Ok((map_profile(row)?, row.get::<_, String>(6)?)),
            )
            .optional()
            .map_err(|e| Error::Database(format!("failed to look up user: {e}")))?
        };

        let Some((profile, hash)) = found else {
            debug!("login for unknown email");
            return Ok(None);
        };

        if self.hasher.verify(password, &hash)? {
            Ok(Some(profile))
        } else {
            debug!("login rejected for user {}", profile.id);
            Ok(None)
        }
    }

    pub fn email_exists(&self, email: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        conn.query_row(
            "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
            params![email.trim()],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to check email: {e}")))
    }

    pub fn get_profile(&self, id: i64) -> Result<Option<UserProfile>> {
        let conn = self.db.connection()?;
        fetch_profile(&conn, id)
    }

    /// Store a reference (path or URL) to the user's profile picture.
    pub fn update_profile_picture(&self, id: i64, picture: &str) -> Result<UserProfile> {
        InputValidator::validate_picture_ref(picture)?;
        self.update_column(id, "profile_picture", Some(picture.trim()))
    }

    pub fn update_phone(&self, id: i64, phone: Option<&str>) -> Result<UserProfile> {
        let phone = phone.map(str::trim).filter(|p| !p.is_empty());
        self.update_column(id, "phone", phone)
    }

    fn update_column(
        &self,
        id: i64,
        column: &'static str,
        value: Option<&str>,
    ) -> Result<UserProfile> {
        let conn = self.db.connection()?;
        let changed = conn
            .execute(
                &format!("UPDATE users SET {column} = ?1 WHERE id = ?2"),
                params![value, id],
            )
            .map_err(|e| Error::Database(format!("failed to update {column}: {e}")))?;

        if changed == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }

        fetch_profile(&conn, id)?.ok_or_else(|| Error::NotFound(format!("user {id}")))
    }
}

fn fetch_profile(conn: &Connection, id: i64) -> Result<Option<UserProfile>> {
    conn.query_row(
        &format!("SELECT {PROFILE_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        map_profile,
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to fetch user {id}: {e}")))
}

fn map_profile(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        profile_picture: row.get(3)?,
        phone: row.get(4)?,
        created_at: datetime_column(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use portrait_security::Pbkdf2Hasher;

    use super::*;
    use crate::builtin;

    fn store() -> UserStore {
        let db = Database::in_memory().unwrap();
        db.migrate(&builtin::registry().unwrap()).unwrap();
        let hasher = Pbkdf2Hasher::new(NonZeroU32::new(1_000).unwrap());
        UserStore::new(Arc::new(db), Arc::new(hasher))
    }

    #[test]
    fn register_and_login() {
        let store = store();
        let id = store.register("Ada", "ada@example.com", "secret1").unwrap();

        let user = store.login("ada@example.com", "secret1").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.name, "Ada");
        assert!(user.profile_picture.is_none());

        assert!(store.login("ada@example.com", "wrong-pass").unwrap().is_none());
        assert!(store.login("bob@example.com", "secret1").unwrap().is_none());
    }

    #[test]
    fn password_is_stored_hashed() {
        let store = store();
        let id = store.register("Ada", "ada@example.com", "secret1").unwrap();

        let conn = store.db.connection().unwrap();
        let stored: String = conn
            .query_row("SELECT password FROM users WHERE id = ?1", [id], |row| row.get(0))
            .unwrap();
        assert_ne!(stored, "secret1");
        assert!(stored.starts_with("pbkdf2-sha256$"));
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let store = store();
        store.register("Ada", "ada@example.com", "secret1").unwrap();
        assert!(store.email_exists("ada@example.com").unwrap());

        let err = store
            .register("Ada Again", "ada@example.com", "secret2")
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn register_validates_input() {
        let store = store();
        assert!(matches!(
            store.register("Ada", "ada@example.com", "short").unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(
            store.register("", "ada@example.com", "secret1").unwrap_err(),
            Error::Validation(_)
        ));
        assert!(!store.email_exists("ada@example.com").unwrap());
    }

    #[test]
    fn name_of_only_control_characters_is_rejected() {
        let store = store();
        for name in ["\u{1}", " \u{7}\u{1b} "] {
            assert!(matches!(
                store.register(name, "ada@example.com", "secret1").unwrap_err(),
                Error::Validation(_)
            ));
        }
        assert!(!store.email_exists("ada@example.com").unwrap());

        let id = store.register("A\u{0}da", "ada@example.com", "secret1").unwrap();
        assert_eq!(store.get_profile(id).unwrap().unwrap().name, "Ada");
    }

    #[test]
    fn update_profile_picture_and_phone() {
        let store = store();
        let id = store.register("Ada", "ada@example.com", "secret1").unwrap();

        let user = store.update_profile_picture(id, "profiles/ada.png").unwrap();
        assert_eq!(user.profile_picture.as_deref(), Some("profiles/ada.png"));

        let user = store.update_phone(id, Some(" 555-0100 ")).unwrap();
        assert_eq!(user.phone.as_deref(), Some("555-0100"));
        assert_eq!(user.profile_picture.as_deref(), Some("profiles/ada.png"));

        let user = store.update_phone(id, None).unwrap();
        assert!(user.phone.is_none());

        let fetched = store.get_profile(id).unwrap().unwrap();
        assert_eq!(fetched, user);
    }

    #[test]
    fn updates_for_missing_user_are_not_found() {
        let store = store();
        assert!(matches!(
            store.update_profile_picture(42, "x.png").unwrap_err(),
            Error::NotFound(_)
        ));
        assert!(matches!(
            store.update_profile_picture(42, "").unwrap_err(),
            Error::Validation(_)
        ));
        assert!(store.get_profile(42).unwrap().is_none());
    }
}
