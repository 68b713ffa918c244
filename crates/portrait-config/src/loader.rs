use std::path::{Path, PathBuf};

use portrait_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const CONFIG_CANDIDATES: &[&str] = &["config.yml", "config.yaml", "config.toml"];

/// Loads `AppConfig` from disk and applies `PORTRAIT_*` environment overrides.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Loader rooted at the platform config directory (`~/.config/portrait` on Linux).
    pub fn default_location() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("portrait");
        Self::new(dir)
    }

    /// Load the first config file found in the config directory, or defaults
    /// when none exists.
    pub fn load(&self) -> Result<AppConfig> {
        let found = CONFIG_CANDIDATES
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|path| path.is_file());

        let mut config = match found {
            Some(path) => Self::read_file(&path)?,
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                AppConfig::default()
            }
        };
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load an explicit config file. Unlike `load`, a missing file is an error.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let mut config = Self::read_file(path)?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}")))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}")))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("config loaded from {}", path.display());
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut AppConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(dir) = var("PORTRAIT_DATA_DIR").filter(|v| !v.is_empty()) {
        config.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(path) = var("PORTRAIT_DB_PATH").filter(|v| !v.is_empty()) {
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(level) = var("PORTRAIT_LOG_LEVEL").filter(|v| !v.is_empty()) {
        config.log.level = level;
    }
}
