use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// File name of the SQLite database inside the data directory.
pub const DEFAULT_DB_FILE: &str = "database.db";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the database and stored profile pictures.
    pub data_dir: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database file. Overrides `data_dir`.
    pub path: Option<PathBuf>,
    pub journal_mode: String,
    pub busy_timeout_ms: u64,
    /// Directory of `<version>_<name>.sql` files used instead of the
    /// compiled-in migrations.
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            journal_mode: "WAL".to_string(),
            busy_timeout_ms: 5000,
            migrations_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.resolved_data_dir().join(DEFAULT_DB_FILE))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portrait")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_defaults_to_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/tmp/portrait-data")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_db_path(),
            PathBuf::from("/tmp/portrait-data/database.db")
        );
    }

    #[test]
    fn explicit_db_path_wins() {
        let mut config = AppConfig {
            data_dir: Some(PathBuf::from("/tmp/portrait-data")),
            ..Default::default()
        };
        config.database.path = Some(PathBuf::from("/var/lib/portrait.db"));
        assert_eq!(
            config.resolved_db_path(),
            PathBuf::from("/var/lib/portrait.db")
        );
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: AppConfig = serde_yaml::from_str("log:\n  json: true\n").unwrap();
        assert!(config.log.json);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.database.journal_mode, "WAL");
        assert_eq!(config.database.busy_timeout_ms, 5000);
    }
}
