//! Domain ports for the index catalog and the migration ledger.

mod macros;
pub(crate) use macros::define_port_error;

mod index_catalog;
mod migration_ledger;

#[cfg(test)]
pub use index_catalog::MockIndexCatalog;
pub use index_catalog::{IndexCatalog, IndexCatalogConnector, IndexCatalogError};
#[cfg(test)]
pub use migration_ledger::MockMigrationLedger;
pub use migration_ledger::{LedgerEntry, MigrationLedger, MigrationLedgerError};
