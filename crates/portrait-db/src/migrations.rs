//! Versioned schema migrations.
//!
//! A [`Registry`] holds the known migrations sorted by version. A [`Migrator`]
//! compares it against the `migrations` ledger table and applies whatever is
//! pending, one transaction per migration, stopping at the first failure.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use portrait_common::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::{self, LedgerEntry};

/// Signature of a migration step written in Rust.
pub type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

/// One direction of a migration.
#[derive(Clone)]
pub enum MigrationStep {
    /// A batch of SQL statements.
    Sql(Cow<'static, str>),
    Func(MigrationFn),
}

impl MigrationStep {
    pub fn sql(sql: &'static str) -> Self {
        MigrationStep::Sql(Cow::Borrowed(sql))
    }

    fn apply(&self, conn: &Connection) -> rusqlite::Result<()> {
        match self {
            MigrationStep::Sql(sql) => conn.execute_batch(sql),
            MigrationStep::Func(f) => f(conn),
        }
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStep::Sql(sql) => f.debug_tuple("Sql").field(&sql.len()).finish(),
            MigrationStep::Func(_) => f.write_str("Func"),
        }
    }
}

/// A versioned schema change. `down: None` means rollback is not supported.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub name: Cow<'static, str>,
    pub up: MigrationStep,
    pub down: Option<MigrationStep>,
}

impl Migration {
    pub fn new(version: u32, name: impl Into<Cow<'static, str>>, up: MigrationStep) -> Self {
        Self {
            version,
            name: name.into(),
            up,
            down: None,
        }
    }

    pub fn with_down(mut self, down: MigrationStep) -> Self {
        self.down = Some(down);
        self
    }

    pub fn reversible(&self) -> bool {
        self.down.is_some()
    }
}

/// Validated set of migrations in ascending version order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    units: Vec<Migration>,
}

impl Registry {
    /// Build a registry from migrations in any order.
    ///
    /// Rejects version 0 and duplicate versions.
    pub fn new(mut units: Vec<Migration>) -> Result<Self> {
        if let Some(unit) = units.iter().find(|m| m.version == 0) {
            return Err(Error::Discovery(format!(
                "migration '{}' has version 0; versions start at 1",
                unit.name
            )));
        }

        units.sort_by_key(|m| m.version);

        if let Some(pair) = units.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(Error::Discovery(format!(
                "duplicate migration version {}: '{}' and '{}'",
                pair[0].version, pair[0].name, pair[1].name
            )));
        }

        Ok(Self { units })
    }

    /// Discover SQL migrations in `dir`.
    ///
    /// Files are named `<version>_<name>.sql`, with an optional
    /// `<version>_<name>.down.sql` holding the rollback. Other files are
    /// ignored. The version prefix is compared numerically.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let read_dir = std::fs::read_dir(dir).map_err(|e| {
            Error::Discovery(format!(
                "cannot read migrations directory {}: {e}",
                dir.display()
            ))
        })?;

        let mut ups: Vec<(u32, String, String)> = Vec::new();
        let mut downs: HashMap<u32, (String, String)> = HashMap::new();

        for entry in read_dir {
            let path = entry
                .map_err(|e| Error::Discovery(format!("failed to list {}: {e}", dir.display())))?
                .path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".sql") else {
                continue;
            };
            let (stem, is_down) = match stem.strip_suffix(".down") {
                Some(stem) => (stem, true),
                None => (stem, false),
            };

            let (version, name) = parse_file_stem(stem).ok_or_else(|| {
                Error::Discovery(format!("invalid migration file name: {file_name}"))
            })?;
            let sql = std::fs::read_to_string(&path)
                .map_err(|e| Error::Discovery(format!("failed to read {file_name}: {e}")))?;

            if is_down {
                if downs.insert(version, (name.to_string(), sql)).is_some() {
                    return Err(Error::Discovery(format!(
                        "duplicate rollback script for version {version}"
                    )));
                }
            } else {
                ups.push((version, name.to_string(), sql));
            }
        }

        let mut units = Vec::with_capacity(ups.len());
        for (version, name, sql) in ups {
            let mut unit = Migration::new(version, name, MigrationStep::Sql(Cow::Owned(sql)));
            if let Some((down_name, down_sql)) = downs.remove(&version) {
                if down_name != unit.name {
                    return Err(Error::Discovery(format!(
                        "rollback script {version}_{down_name} does not match migration {version}_{}",
                        unit.name
                    )));
                }
                unit.down = Some(MigrationStep::Sql(Cow::Owned(down_sql)));
            }
            units.push(unit);
        }

        if let Some(version) = downs.keys().min() {
            return Err(Error::Discovery(format!(
                "rollback script for version {version} has no matching migration"
            )));
        }

        let registry = Self::new(units)?;
        debug!(
            "discovered {} migration(s) in {}",
            registry.len(),
            dir.display()
        );
        Ok(registry)
    }

    pub fn units(&self) -> &[Migration] {
        &self.units
    }

    pub fn get(&self, version: u32) -> Option<&Migration> {
        self.units
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|i| &self.units[i])
    }

    pub fn latest_version(&self) -> Option<u32> {
        self.units.last().map(|m| m.version)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn parse_file_stem(stem: &str) -> Option<(u32, &str)> {
    let (digits, name) = stem.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((digits.parse().ok()?, name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationEvent {
    pub version: u32,
    pub name: String,
    pub outcome: Outcome,
}

/// What a migration run did, per registered migration, in apply order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub events: Vec<MigrationEvent>,
}

impl MigrationReport {
    fn push(&mut self, unit: &Migration, outcome: Outcome) {
        self.events.push(MigrationEvent {
            version: unit.version,
            name: unit.name.to_string(),
            outcome,
        });
    }

    pub fn applied(&self) -> impl Iterator<Item = &MigrationEvent> {
        self.events.iter().filter(|e| e.outcome == Outcome::Applied)
    }

    pub fn applied_versions(&self) -> Vec<u32> {
        self.applied().map(|e| e.version).collect()
    }

    /// True when nothing was applied.
    pub fn is_noop(&self) -> bool {
        self.applied().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolledBack {
    pub version: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Applied,
    Pending,
    /// Recorded in the ledger but unknown to the registry.
    Orphaned,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub version: u32,
    pub name: String,
    pub state: MigrationState,
    pub executed_at: Option<DateTime<Utc>>,
    pub reversible: bool,
}

/// Applies and rolls back migrations from a [`Registry`] against a connection
/// whose ledger table already exists.
pub struct Migrator<'r> {
    registry: &'r Registry,
}

impl<'r> Migrator<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    /// Apply every pending migration in version order.
    ///
    /// Each migration runs in its own `IMMEDIATE` transaction together with
    /// its ledger insert. The first failure aborts the run; migrations that
    /// committed before it stay applied.
    pub fn run(&self, conn: &mut Connection) -> Result<MigrationReport> {
        let applied = ledger::applied_versions(conn)?;
        debug!(
            "{} migration(s) registered, {} recorded in ledger",
            self.registry.len(),
            applied.len()
        );

        let mut report = MigrationReport::default();
        for unit in self.registry.units() {
            if applied.contains(&unit.version) {
                debug!("migration {} ({}) already applied", unit.version, unit.name);
                report.push(unit, Outcome::Skipped);
                continue;
            }

            match apply(conn, unit) {
                Ok(outcome) => report.push(unit, outcome),
                Err(e) => {
                    warn!("migration run stopped at version {}: {e}", unit.version);
                    return Err(e);
                }
            }
        }

        if report.is_noop() {
            debug!("schema is up to date");
        } else {
            info!(
                "applied {} migration(s): {:?}",
                report.applied().count(),
                report.applied_versions()
            );
        }
        Ok(report)
    }

    /// Roll back the highest applied migration.
    ///
    /// Returns `Ok(None)` when the ledger is empty.
    pub fn rollback_last(&self, conn: &mut Connection) -> Result<Option<RolledBack>> {
        // The latest-version lookup must happen under the write lock, or a
        // concurrent run could commit a higher version first.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin rollback transaction: {e}")))?;

        let Some(last) = ledger::latest(&tx)? else {
            debug!("no migrations to roll back");
            return Ok(None);
        };
        let version = last.version;

        let unit = self
            .registry
            .get(version)
            .ok_or(Error::RollbackUnitMissing { version })?;
        let down = unit
            .down
            .as_ref()
            .ok_or(Error::RollbackUnsupported { version })?;

        let fail = |cause: String| Error::RollbackFailed {
            version,
            name: unit.name.to_string(),
            cause,
        };

        info!("rolling back migration {} ({})", version, unit.name);
        down.apply(&tx).map_err(|e| fail(e.to_string()))?;

        let removed = ledger::remove(&tx, version).map_err(|e| fail(e.to_string()))?;
        if removed != 1 {
            return Err(fail(format!("ledger row for version {version} is missing")));
        }

        tx.commit().map_err(|e| fail(format!("commit failed: {e}")))?;

        info!("migration {} rolled back", version);
        Ok(Some(RolledBack {
            version,
            name: unit.name.to_string(),
        }))
    }

    /// Per-version view of registry and ledger, in version order.
    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        let mut recorded: HashMap<u32, LedgerEntry> = ledger::entries(conn)?
            .into_iter()
            .map(|e| (e.version, e))
            .collect();

        let mut statuses: Vec<MigrationStatus> = self
            .registry
            .units()
            .iter()
            .map(|unit| {
                let entry = recorded.remove(&unit.version);
                MigrationStatus {
                    version: unit.version,
                    name: unit.name.to_string(),
                    state: if entry.is_some() {
                        MigrationState::Applied
                    } else {
                        MigrationState::Pending
                    },
                    executed_at: entry.map(|e| e.executed_at),
                    reversible: unit.reversible(),
                }
            })
            .collect();

        statuses.extend(recorded.into_values().map(|entry| MigrationStatus {
            version: entry.version,
            name: entry.name,
            state: MigrationState::Orphaned,
            executed_at: Some(entry.executed_at),
            reversible: false,
        }));
        statuses.sort_by_key(|s| s.version);
        Ok(statuses)
    }

    /// Registered migrations not yet recorded in the ledger, in apply order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<&'r Migration>> {
        let applied = ledger::applied_versions(conn)?;
        Ok(self
            .registry
            .units()
            .iter()
            .filter(|m| !applied.contains(&m.version))
            .collect())
    }
}

fn apply(conn: &mut Connection, unit: &Migration) -> Result<Outcome> {
    let fail = |cause: String| Error::MigrationApply {
        version: unit.version,
        name: unit.name.to_string(),
        cause,
    };

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    // Another process may have applied it between planning and taking the
    // write lock.
    if ledger::contains(&tx, unit.version).map_err(|e| fail(e.to_string()))? {
        debug!(
            "migration {} ({}) was applied by another connection",
            unit.version, unit.name
        );
        return Ok(Outcome::Skipped);
    }

    info!("applying migration {} ({})", unit.version, unit.name);
    unit.up.apply(&tx).map_err(|e| fail(e.to_string()))?;
    ledger::record(&tx, unit.version, &unit.name, Utc::now()).map_err(|e| fail(e.to_string()))?;
    tx.commit().map_err(|e| fail(format!("commit failed: {e}")))?;

    Ok(Outcome::Applied)
}
