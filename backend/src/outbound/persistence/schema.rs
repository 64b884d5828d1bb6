//! Diesel table definitions for the migration ledger.
//!
//! The table is created on first use by the ledger adapter; keep this
//! definition in step with `LEDGER_DDL` in `diesel_migration_ledger.rs`.

diesel::table! {
    /// Index migrations that completed successfully.
    index_migration_ledger (version) {
        /// Primary key: migration version.
        version -> Text,
        /// Human description of the migration.
        description -> Text,
        /// SHA-256 hex digest of the migration's rendered DDL.
        checksum -> Text,
        /// When the migration completed.
        applied_at -> Timestamptz,
    }
}
