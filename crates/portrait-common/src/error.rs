use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// The migration source could not be read or describes an invalid registry.
    #[error("migration discovery failed: {0}")]
    Discovery(String),

    #[error("migration {version} ({name}) failed: {cause}")]
    MigrationApply {
        version: u32,
        name: String,
        cause: String,
    },

    #[error("rollback of migration {version} ({name}) failed: {cause}")]
    RollbackFailed {
        version: u32,
        name: String,
        cause: String,
    },

    #[error("migration {version} does not support rollback")]
    RollbackUnsupported { version: u32 },

    #[error("no registered migration for applied version {version}")]
    RollbackUnitMissing { version: u32 },

    #[error("security error: {0}")]
    Security(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Version of the migration this error refers to, if any.
    pub fn migration_version(&self) -> Option<u32> {
        match self {
            Error::MigrationApply { version, .. }
            | Error::RollbackFailed { version, .. }
            | Error::RollbackUnsupported { version }
            | Error::RollbackUnitMissing { version } => Some(*version),
            _ => None,
        }
    }
}
