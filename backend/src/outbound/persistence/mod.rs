//! PostgreSQL persistence adapters.
//!
//! - [`PostgresIndexCatalogConnector`] implements the index catalog port with
//!   the synchronous `postgres` client, which reports SQLSTATE codes and
//!   never wraps statements in a transaction.
//! - [`DieselMigrationLedger`] implements the migration ledger port with a
//!   synchronous Diesel connection.
//!
//! Diesel row structs (`models.rs`) and the schema (`schema.rs`) are internal
//! details and never leave this module.

mod diesel_migration_ledger;
mod models;
mod postgres_errors;
mod postgres_index_catalog;
mod schema;

pub use diesel_migration_ledger::DieselMigrationLedger;
pub use postgres_index_catalog::{PostgresIndexCatalog, PostgresIndexCatalogConnector};
