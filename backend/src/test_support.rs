//! Test utilities for the migrations crate.
//!
//! In-memory doubles for the domain ports, shared by unit tests, doctests,
//! and behavioural tests that do not need a live PostgreSQL cluster. Compiled
//! only for tests or with the `test-support` feature.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, Utc};
use mockable::Clock;

use crate::domain::ports::{
    IndexCatalog, IndexCatalogConnector, IndexCatalogError, LedgerEntry, MigrationLedger,
    MigrationLedgerError,
};
use crate::domain::{Identifier, IndexName, IndexObservation, IndexSpec, IndexState};

#[derive(Debug, Clone)]
struct StoredIndex {
    table: String,
    is_valid: bool,
    build_in_progress: bool,
}

#[derive(Debug, Default)]
struct CatalogState {
    tables: BTreeMap<String, Vec<String>>,
    indexes: BTreeMap<String, StoredIndex>,
    interrupt: BTreeSet<String>,
    statements: Vec<String>,
    create_calls: usize,
    drop_calls: usize,
    refuse_connections: bool,
}

/// Index catalog held in memory.
///
/// Clones share state, so a test can hand one clone to the service as its
/// connector and inspect the outcome through another.
///
/// # Examples
///
/// ```rust
/// use insightball_migrations::domain::IndexState;
/// use insightball_migrations::test_support::InMemoryIndexCatalog;
///
/// let catalog = InMemoryIndexCatalog::new()
///     .with_table("matches", &["id", "user_id"])
///     .with_invalid_index("matches", "ix_matches_user_id");
/// assert_eq!(catalog.state_of("ix_matches_user_id"), IndexState::PresentInvalid);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndexCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl InMemoryIndexCatalog {
    /// Create an empty catalog with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table with the given columns.
    #[must_use]
    pub fn with_table(self, table: &str, columns: &[&str]) -> Self {
        self.lock().tables.insert(
            table.to_owned(),
            columns.iter().map(|column| (*column).to_owned()).collect(),
        );
        self
    }

    /// Seed a valid index.
    #[must_use]
    pub fn with_valid_index(self, table: &str, name: &str) -> Self {
        self.seed_index(table, name, true, false)
    }

    /// Seed an index left invalid by an interrupted build.
    #[must_use]
    pub fn with_invalid_index(self, table: &str, name: &str) -> Self {
        self.seed_index(table, name, false, false)
    }

    /// Seed an index another session is still building.
    #[must_use]
    pub fn with_building_index(self, table: &str, name: &str) -> Self {
        self.seed_index(table, name, false, true)
    }

    /// Make the next build of `name` fail and leave an invalid index.
    #[must_use]
    pub fn interrupt_build_of(self, name: &str) -> Self {
        self.lock().interrupt.insert(name.to_owned());
        self
    }

    /// Make every connection attempt fail.
    #[must_use]
    pub fn refuse_connections(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    /// Lifecycle state of the named index.
    pub fn state_of(&self, name: &str) -> IndexState {
        let state = self.lock();
        match state.indexes.get(name) {
            None => IndexState::Absent,
            Some(index) if index.is_valid => IndexState::PresentValid,
            Some(index) if index.build_in_progress => IndexState::Building,
            Some(_) => IndexState::PresentInvalid,
        }
    }

    /// Number of valid indexes.
    pub fn valid_index_count(&self) -> usize {
        self.lock()
            .indexes
            .values()
            .filter(|index| index.is_valid)
            .count()
    }

    /// Number of create requests received.
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Number of drop requests received.
    pub fn drop_calls(&self) -> usize {
        self.lock().drop_calls
    }

    /// DDL statements received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn seed_index(self, table: &str, name: &str, is_valid: bool, build_in_progress: bool) -> Self {
        self.lock().indexes.insert(
            name.to_owned(),
            StoredIndex {
                table: table.to_owned(),
                is_valid,
                build_in_progress,
            },
        );
        self
    }

    fn lock(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IndexCatalog for InMemoryIndexCatalog {
    fn table_columns(&mut self, table: &str) -> Result<Option<Vec<String>>, IndexCatalogError> {
        Ok(self.lock().tables.get(table).cloned())
    }

    fn observe_index(
        &mut self,
        name: &IndexName,
    ) -> Result<Option<IndexObservation>, IndexCatalogError> {
        let Some(index) = self.lock().indexes.get(name.as_str()).cloned() else {
            return Ok(None);
        };
        let table = Identifier::new(index.table)
            .map_err(|error| IndexCatalogError::query(error.to_string()))?;
        Ok(Some(IndexObservation {
            table,
            is_valid: index.is_valid,
            build_in_progress: index.build_in_progress,
        }))
    }

    fn create_index_concurrently(&mut self, spec: &IndexSpec) -> Result<(), IndexCatalogError> {
        let mut state = self.lock();
        state.create_calls += 1;
        state.statements.push(spec.create_statement());

        if !state.tables.contains_key(spec.table().as_str()) {
            return Err(IndexCatalogError::schema_mismatch(format!(
                "relation \"{}\" does not exist",
                spec.table()
            )));
        }
        if state.indexes.contains_key(spec.name().as_str()) {
            return Ok(());
        }

        let interrupted = state.interrupt.remove(spec.name().as_str());
        state.indexes.insert(
            spec.name().as_str().to_owned(),
            StoredIndex {
                table: spec.table().as_str().to_owned(),
                is_valid: !interrupted,
                build_in_progress: false,
            },
        );
        if interrupted {
            return Err(IndexCatalogError::build_interrupted(format!(
                "canceling statement due to user request while building {}",
                spec.name()
            )));
        }
        Ok(())
    }

    fn drop_index_concurrently(&mut self, name: &IndexName) -> Result<(), IndexCatalogError> {
        let mut state = self.lock();
        state.drop_calls += 1;
        state.statements.push(crate::domain::drop_statement(name));
        state.indexes.remove(name.as_str());
        Ok(())
    }
}

impl IndexCatalogConnector for InMemoryIndexCatalog {
    fn connect(&self) -> Result<Box<dyn IndexCatalog>, IndexCatalogError> {
        if self.lock().refuse_connections {
            return Err(IndexCatalogError::connection("connection refused"));
        }
        Ok(Box::new(self.clone()))
    }
}

/// Migration ledger held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMigrationLedger {
    entries: Arc<Mutex<Vec<LedgerEntry>>>,
}

impl InMemoryMigrationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a recorded entry.
    #[must_use]
    pub fn with_entry(self, entry: LedgerEntry) -> Self {
        self.lock().push(entry);
        self
    }

    /// Recorded entries, in insertion order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MigrationLedger for InMemoryMigrationLedger {
    fn applied(&self) -> Result<Vec<LedgerEntry>, MigrationLedgerError> {
        let mut entries = self.entries();
        entries.sort_by(|left, right| left.version.cmp(&right.version));
        Ok(entries)
    }

    fn record(&self, entry: &LedgerEntry) -> Result<(), MigrationLedgerError> {
        let mut entries = self.lock();
        if entries.iter().any(|existing| existing.version == entry.version) {
            return Err(MigrationLedgerError::query(format!(
                "duplicate key value violates unique constraint: version {}",
                entry.version
            )));
        }
        entries.push(entry.clone());
        Ok(())
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.0.with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.0
    }
}
