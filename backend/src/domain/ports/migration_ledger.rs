//! Port abstraction for the record of applied index migrations.

use chrono::{DateTime, Utc};

use super::define_port_error;

define_port_error! {
    /// Errors raised by migration ledger adapters.
    pub enum MigrationLedgerError {
        /// The ledger store could not be reached.
        Connection { message: String } =>
            "migration ledger connection failed: {message}",
        /// Reading or writing the ledger failed.
        Query { message: String } =>
            "migration ledger query failed: {message}",
    }
}

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Unique migration version.
    pub version: String,
    /// Human description recorded alongside the version.
    pub description: String,
    /// Checksum of the migration's DDL at the time it was applied.
    pub checksum: String,
    /// When the migration completed.
    pub applied_at: DateTime<Utc>,
}

/// Port for reading and appending the ledger of applied migrations.
#[cfg_attr(test, mockall::automock)]
pub trait MigrationLedger: Send + Sync {
    /// All recorded migrations, ordered by version.
    fn applied(&self) -> Result<Vec<LedgerEntry>, MigrationLedgerError>;

    /// Append an entry once its migration has fully succeeded.
    fn record(&self, entry: &LedgerEntry) -> Result<(), MigrationLedgerError>;
}
