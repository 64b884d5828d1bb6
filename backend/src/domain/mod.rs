//! Domain model for secondary index migrations.
//!
//! Purpose: decide which indexes the hot query paths need, track each index
//! through its build lifecycle, and apply versioned migrations idempotently.
//! Storage is reached only through the traits in [`ports`].

pub mod hot_paths;
pub mod index_migration;
pub mod index_policy;
pub mod index_state;
pub mod migration_runner;
pub mod ports;

pub use self::hot_paths::{
    HOT_PATH_MIGRATION_VERSION, hot_path_access_patterns, hot_path_indexes, migration_log,
};
pub use self::index_migration::{
    IndexAction, IndexFailure, IndexMigrationError, IndexMigrationOptions, IndexMigrationService,
    IndexOutcome, IndexStatus, InvalidIndexPolicy, ensure_index,
};
pub use self::index_policy::{
    ColumnAccess, ColumnUsage, Identifier, IndexName, IndexPolicyError, IndexPredicate, IndexSpec,
    MAX_IDENTIFIER_LEN, TableAccessPattern, ValueDistribution, drop_statement, select_indexes,
};
pub use self::index_state::{IllegalTransition, IndexObservation, IndexState, IndexTransition};
pub use self::migration_runner::{
    AppliedMigration, IndexMigration, LedgerDrift, MigrationLog, MigrationLogError,
    MigrationRunError, MigrationRunner, MigrationStatus, RunReport, pending,
};
