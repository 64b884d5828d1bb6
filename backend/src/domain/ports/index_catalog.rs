//! Port abstraction over the relational store's index catalog and DDL.

use crate::domain::index_policy::{IndexName, IndexSpec};
use crate::domain::index_state::IndexObservation;

use super::define_port_error;

define_port_error! {
    /// Errors raised by index catalog adapters.
    pub enum IndexCatalogError {
        /// The store could not be reached or the session was lost.
        Connection { message: String } =>
            "index catalog connection failed: {message}",
        /// A catalog query or DDL statement failed.
        Query { message: String } =>
            "index catalog query failed: {message}",
        /// DDL referenced a table or column the schema does not have.
        SchemaMismatch { message: String } =>
            "schema mismatch: {message}",
        /// A concurrent build was cancelled, terminated, or deadlocked.
        BuildInterrupted { message: String } =>
            "concurrent index build interrupted: {message}",
    }
}

/// One session against the index catalog.
///
/// Implementations must issue every DDL statement outside an explicit
/// transaction block so concurrent builds do not hold table write locks.
#[cfg_attr(test, mockall::automock)]
pub trait IndexCatalog: Send {
    /// Column names of `table`, or `None` when the table does not exist.
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<String>>, IndexCatalogError>;

    /// Catalog facts for the named index, or `None` when it does not exist.
    fn observe_index(
        &mut self,
        name: &IndexName,
    ) -> Result<Option<IndexObservation>, IndexCatalogError>;

    /// Build the index with a non-blocking concurrent build.
    fn create_index_concurrently(&mut self, spec: &IndexSpec) -> Result<(), IndexCatalogError>;

    /// Drop the index with a non-blocking concurrent drop.
    fn drop_index_concurrently(&mut self, name: &IndexName) -> Result<(), IndexCatalogError>;
}

/// Opens independent catalog sessions, one per worker.
pub trait IndexCatalogConnector: Send + Sync {
    /// Open a new session.
    fn connect(&self) -> Result<Box<dyn IndexCatalog>, IndexCatalogError>;
}
