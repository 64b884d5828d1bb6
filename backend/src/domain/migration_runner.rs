//! Ordered index migrations and the ledger of what has been applied.
//!
//! The log is append-only: each [`IndexMigration`] is immutable once shipped,
//! and its checksum pins the DDL it rendered when first applied. A ledger
//! entry whose checksum no longer matches is treated as drift and stops the
//! run before any DDL is issued.

use std::collections::HashSet;
use std::sync::Arc;

use mockable::Clock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::index_migration::{
    IndexMigrationError, IndexMigrationService, IndexOutcome, IndexStatus,
};
use super::index_policy::{IndexPolicyError, IndexSpec, ensure_unique_names};
use super::ports::{IndexCatalogError, LedgerEntry, MigrationLedger, MigrationLedgerError};

/// Errors raised while assembling the migration log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationLogError {
    /// A migration was declared without a version.
    #[error("migration version must not be empty")]
    EmptyVersion,
    /// Two migrations share a version.
    #[error("migration version '{version}' appears more than once")]
    DuplicateVersion {
        /// Repeated version.
        version: String,
    },
    /// Versions must be strictly increasing.
    #[error("migration version '{version}' is out of order")]
    OutOfOrder {
        /// Version that sorts before its predecessor.
        version: String,
    },
    /// A migration's specs were rejected.
    #[error(transparent)]
    Policy(#[from] IndexPolicyError),
}

/// One immutable, versioned set of index specs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMigration {
    version: String,
    description: String,
    specs: Vec<IndexSpec>,
}

impl IndexMigration {
    /// Declare a migration.
    pub fn new(
        version: impl Into<String>,
        description: impl Into<String>,
        specs: Vec<IndexSpec>,
    ) -> Result<Self, MigrationLogError> {
        let version = version.into();
        if version.trim().is_empty() {
            return Err(MigrationLogError::EmptyVersion);
        }
        ensure_unique_names(&specs)?;
        Ok(Self {
            version,
            description: description.into(),
            specs,
        })
    }

    /// Unique, sortable version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Human description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Index specs in build order.
    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// SHA-256 hex digest of the rendered create statements.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use insightball_migrations::domain::{IndexMigration, IndexSpec};
    ///
    /// let spec = IndexSpec::new("players", &["club_id"]).expect("spec");
    /// let migration = IndexMigration::new("0001", "players", vec![spec]).expect("migration");
    /// assert_eq!(migration.checksum().len(), 64);
    /// ```
    pub fn checksum(&self) -> String {
        let rendered = self
            .specs
            .iter()
            .map(IndexSpec::create_statement)
            .collect::<Vec<_>>()
            .join("\n");
        hex::encode(Sha256::digest(rendered.as_bytes()))
    }
}

/// Ordered, append-only list of migrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationLog {
    migrations: Vec<IndexMigration>,
}

impl MigrationLog {
    /// Validate ordering and uniqueness of versions.
    pub fn new(migrations: Vec<IndexMigration>) -> Result<Self, MigrationLogError> {
        let mut seen = HashSet::new();
        let mut previous: Option<&str> = None;
        for migration in &migrations {
            if !seen.insert(migration.version()) {
                return Err(MigrationLogError::DuplicateVersion {
                    version: migration.version().to_owned(),
                });
            }
            if previous.is_some_and(|before| before > migration.version()) {
                return Err(MigrationLogError::OutOfOrder {
                    version: migration.version().to_owned(),
                });
            }
            previous = Some(migration.version());
        }
        Ok(Self { migrations })
    }

    /// Migrations in version order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexMigration> {
        self.migrations.iter()
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns true when the log holds no migrations.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// A recorded checksum no longer matches the shipped migration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "ledger drift for migration '{version}': recorded checksum {recorded} \
     does not match expected {expected}"
)]
pub struct LedgerDrift {
    /// Drifting version.
    pub version: String,
    /// Checksum stored in the ledger.
    pub recorded: String,
    /// Checksum of the shipped migration.
    pub expected: String,
}

/// Migrations in `log` that `applied` does not record, in log order.
///
/// Fails on the first recorded checksum that differs from the log. Ledger
/// versions the log does not know are logged and ignored.
pub fn pending<'a>(
    log: &'a MigrationLog,
    applied: &[LedgerEntry],
) -> Result<Vec<&'a IndexMigration>, LedgerDrift> {
    for entry in applied {
        if !log.iter().any(|migration| migration.version() == entry.version) {
            warn!(version = %entry.version, "ledger records a migration unknown to this build");
        }
    }

    let mut delta = Vec::new();
    for migration in log.iter() {
        match applied
            .iter()
            .find(|entry| entry.version == migration.version())
        {
            Some(entry) => {
                let expected = migration.checksum();
                if entry.checksum != expected {
                    return Err(LedgerDrift {
                        version: entry.version.clone(),
                        recorded: entry.checksum.clone(),
                        expected,
                    });
                }
            }
            None => delta.push(migration),
        }
    }
    Ok(delta)
}

/// Errors raised by [`MigrationRunner`].
#[derive(Debug, thiserror::Error)]
pub enum MigrationRunError {
    /// The ledger could not be read or written.
    #[error(transparent)]
    Ledger(#[from] MigrationLedgerError),
    /// A recorded migration changed after it was applied.
    #[error(transparent)]
    Drift(#[from] LedgerDrift),
    /// An index operation failed; the migration was not recorded.
    #[error("migration '{version}' failed: {source}")]
    Migration {
        /// Version of the failing migration.
        version: String,
        /// Index failure that halted the migration.
        #[source]
        source: IndexMigrationError,
    },
    /// The catalog could not be inspected.
    #[error(transparent)]
    Catalog(#[from] IndexCatalogError),
}

/// A migration applied during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Migration version.
    pub version: String,
    /// Per-index outcomes in plan order.
    pub outcomes: Vec<IndexOutcome>,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    /// Migrations applied by this run, in order.
    pub applied: Vec<AppliedMigration>,
}

impl RunReport {
    /// Returns true when nothing was pending.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Recorded and live state of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Migration version.
    pub version: String,
    /// Human description.
    pub description: String,
    /// Whether the ledger records the migration.
    pub recorded: bool,
    /// Live state of each index.
    pub indexes: Vec<IndexStatus>,
}

/// Applies the migration log through the index migration service.
pub struct MigrationRunner {
    log: MigrationLog,
    ledger: Arc<dyn MigrationLedger>,
    service: IndexMigrationService,
    clock: Arc<dyn Clock>,
}

impl MigrationRunner {
    /// Create a runner.
    pub fn new(
        log: MigrationLog,
        ledger: Arc<dyn MigrationLedger>,
        service: IndexMigrationService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log,
            ledger,
            service,
            clock,
        }
    }

    /// The log the runner applies.
    pub fn log(&self) -> &MigrationLog {
        &self.log
    }

    /// Versions not yet recorded in the ledger.
    pub fn pending_versions(&self) -> Result<Vec<String>, MigrationRunError> {
        let applied = self.ledger.applied()?;
        Ok(pending(&self.log, &applied)?
            .into_iter()
            .map(|migration| migration.version().to_owned())
            .collect())
    }

    /// Apply every pending migration in order, halting on the first failure.
    pub fn run(&self) -> Result<RunReport, MigrationRunError> {
        let applied = self.ledger.applied()?;
        let delta = pending(&self.log, &applied)?;
        if delta.is_empty() {
            info!("no pending index migrations");
            return Ok(RunReport::default());
        }

        let mut report = RunReport::default();
        for migration in delta {
            info!(
                version = migration.version(),
                indexes = migration.specs().len(),
                "applying index migration"
            );
            let outcomes =
                self.service
                    .apply(migration.specs())
                    .map_err(|source| MigrationRunError::Migration {
                        version: migration.version().to_owned(),
                        source,
                    })?;

            self.ledger.record(&LedgerEntry {
                version: migration.version().to_owned(),
                description: migration.description().to_owned(),
                checksum: migration.checksum(),
                applied_at: self.clock.utc(),
            })?;
            info!(version = migration.version(), "index migration recorded");

            report.applied.push(AppliedMigration {
                version: migration.version().to_owned(),
                outcomes,
            });
        }
        Ok(report)
    }

    /// Report recorded and live state without changing anything.
    pub fn status(&self) -> Result<Vec<MigrationStatus>, MigrationRunError> {
        let applied = self.ledger.applied()?;
        self.log
            .iter()
            .map(|migration| {
                Ok(MigrationStatus {
                    version: migration.version().to_owned(),
                    description: migration.description().to_owned(),
                    recorded: applied
                        .iter()
                        .any(|entry| entry.version == migration.version()),
                    indexes: self.service.inspect(migration.specs())?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "migration_runner_tests.rs"]
mod tests;
