//! Internal Diesel row structs for the migration ledger.
//!
//! These types never leave the persistence layer; adapters convert them to
//! [`LedgerEntry`] values.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::index_migration_ledger;
use crate::domain::ports::LedgerEntry;

/// Row struct for reading from the ledger table.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = index_migration_ledger)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct LedgerRow {
    pub version: String,
    pub description: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
}

impl From<LedgerRow> for LedgerEntry {
    fn from(row: LedgerRow) -> Self {
        Self {
            version: row.version,
            description: row.description,
            checksum: row.checksum,
            applied_at: row.applied_at,
        }
    }
}

/// Insertable struct for recording a completed migration.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = index_migration_ledger)]
pub(crate) struct NewLedgerRow<'a> {
    pub version: &'a str,
    pub description: &'a str,
    pub checksum: &'a str,
    pub applied_at: DateTime<Utc>,
}

impl<'a> From<&'a LedgerEntry> for NewLedgerRow<'a> {
    fn from(entry: &'a LedgerEntry) -> Self {
        Self {
            version: entry.version.as_str(),
            description: entry.description.as_str(),
            checksum: entry.checksum.as_str(),
            applied_at: entry.applied_at,
        }
    }
}
