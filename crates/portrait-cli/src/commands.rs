use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use portrait_config::AppConfig;
use portrait_db::{
    Database, DbOptions, MigrationReport, MigrationState, Registry, UserStore, builtin,
};
use portrait_security::Pbkdf2Hasher;
use tracing::info;

/// Process-level owner of the database handle and migration registry.
pub struct Host {
    db: Arc<Database>,
    registry: Registry,
}

impl Host {
    pub fn open(config: &AppConfig) -> Result<Self> {
        let registry = match &config.database.migrations_dir {
            Some(dir) => Registry::from_dir(dir)
                .with_context(|| format!("failed to load migrations from {}", dir.display()))?,
            None => builtin::registry().context("invalid built-in migrations")?,
        };

        let db_path = config.resolved_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let options = DbOptions {
            journal_mode: config.database.journal_mode.clone(),
            busy_timeout: Duration::from_millis(config.database.busy_timeout_ms),
        };
        let db = Database::open(&db_path, &options)
            .with_context(|| format!("failed to open database {}", db_path.display()))?;

        Ok(Self {
            db: Arc::new(db),
            registry,
        })
    }

    pub fn migrate(&self) -> Result<MigrationReport> {
        self.db
            .migrate(&self.registry)
            .context("database migration failed")
    }

    fn users(&self) -> UserStore {
        UserStore::new(self.db.clone(), Arc::new(Pbkdf2Hasher::default()))
    }
}

pub fn migrate(host: &Host) -> Result<()> {
    let report = host.migrate()?;
    if report.is_noop() {
        println!("Schema is up to date.");
    } else {
        for event in report.applied() {
            println!("Applied {:>4}  {}", event.version, event.name);
        }
    }
    Ok(())
}

pub fn rollback(host: &Host) -> Result<()> {
    match host
        .db
        .rollback_last(&host.registry)
        .context("rollback failed")?
    {
        Some(rolled) => println!("Rolled back {:>4}  {}", rolled.version, rolled.name),
        None => println!("No migrations to roll back."),
    }
    Ok(())
}

pub fn status(host: &Host, json: bool) -> Result<()> {
    let statuses = host.db.migration_status(&host.registry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("{:>7}  {:<9}  {:<28}  EXECUTED AT", "VERSION", "STATE", "NAME");
    for s in &statuses {
        let state = match s.state {
            MigrationState::Applied => "applied",
            MigrationState::Pending => "pending",
            MigrationState::Orphaned => "orphaned",
        };
        let executed = s
            .executed_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!("{:>7}  {:<9}  {:<28}  {}", s.version, state, s.name, executed);
    }
    Ok(())
}

pub fn register_user(host: &Host, name: &str, email: &str, password: &str) -> Result<()> {
    let id = host.users().register(name, email, password)?;
    info!("registered {email}");
    println!("{id}");
    Ok(())
}

pub fn show_user(host: &Host, id: i64) -> Result<()> {
    let Some(profile) = host.users().get_profile(id)? else {
        bail!("user {id} not found");
    };
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub fn set_picture(host: &Host, id: i64, picture: &str) -> Result<()> {
    let profile = host.users().update_profile_picture(id, picture)?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}
