//! Applies index specs idempotently with non-blocking builds.
//!
//! Specs are grouped by table. Groups are independent, so up to
//! [`IndexMigrationOptions::parallel_tables`] of them run at once, each on its
//! own catalog session; operations inside a group run one after another.
//! The first failure halts the run: no further operation starts, but builds
//! already in flight on other tables finish so they are not themselves left
//! invalid.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::index_policy::{Identifier, IndexName, IndexSpec};
use super::index_state::{IllegalTransition, IndexState, IndexTransition};
use super::ports::{IndexCatalog, IndexCatalogConnector, IndexCatalogError};

/// What to do with an index left invalid by an interrupted build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InvalidIndexPolicy {
    /// Stop and ask an operator to inspect and drop the index.
    #[default]
    FailFast,
    /// Drop the invalid index concurrently and build it again.
    DropAndRebuild,
}

/// Tuning for an index migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMigrationOptions {
    /// Maximum number of tables processed at once.
    pub parallel_tables: NonZeroUsize,
    /// Handling of present-invalid indexes.
    pub invalid_index_policy: InvalidIndexPolicy,
}

impl Default for IndexMigrationOptions {
    fn default() -> Self {
        Self {
            parallel_tables: NonZeroUsize::MIN,
            invalid_index_policy: InvalidIndexPolicy::FailFast,
        }
    }
}

/// Action taken for one index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexAction {
    /// The index was absent and has been built.
    Created,
    /// A valid index already existed.
    Skipped,
    /// An invalid index was dropped and built again.
    Rebuilt,
}

/// Result of one successful index operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    /// Index name.
    pub index: IndexName,
    /// Table the index belongs to.
    pub table: Identifier,
    /// Action taken.
    pub action: IndexAction,
}

/// Current state of one index, as reported by `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStatus {
    /// Index name.
    pub index: IndexName,
    /// Table the index belongs to.
    pub table: Identifier,
    /// Observed lifecycle state.
    pub state: IndexState,
}

/// Why a single index operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexFailure {
    /// The index is present but invalid after an interrupted concurrent build.
    #[error(
        "index is present but invalid after an interrupted concurrent build; \
         drop it or re-run with drop-and-rebuild enabled"
    )]
    BuildInterrupted,
    /// Another session is building the index right now.
    #[error("index is still being built by another session")]
    BuildInProgress,
    /// The referenced table or column does not exist, or the name is taken
    /// by an index on another table.
    #[error("schema mismatch: {detail}")]
    SchemaMismatch {
        /// What did not match.
        detail: String,
    },
    /// The catalog could not be read or the DDL failed for another reason.
    #[error(transparent)]
    Catalog(IndexCatalogError),
    /// The lifecycle rejected a transition.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

impl IndexFailure {
    fn schema_mismatch(detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            detail: detail.into(),
        }
    }
}

impl From<IndexCatalogError> for IndexFailure {
    fn from(error: IndexCatalogError) -> Self {
        match error {
            IndexCatalogError::SchemaMismatch { message } => Self::SchemaMismatch { detail: message },
            IndexCatalogError::BuildInterrupted { .. } => Self::BuildInterrupted,
            other => Self::Catalog(other),
        }
    }
}

/// A run halted on a failing index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("index '{index}' on table '{table}' failed: {failure}")]
pub struct IndexMigrationError {
    /// Index whose operation failed.
    pub index: IndexName,
    /// Table of the failing index.
    pub table: Identifier,
    /// Failure cause.
    pub failure: IndexFailure,
    /// Operations that completed before the run halted.
    pub completed: Vec<IndexOutcome>,
}

/// Resolve the state of one index and bring it to present-valid.
///
/// # Examples
///
/// ```rust
/// use insightball_migrations::domain::{
///     IndexAction, IndexSpec, InvalidIndexPolicy, ensure_index,
/// };
/// use insightball_migrations::test_support::InMemoryIndexCatalog;
///
/// let mut catalog = InMemoryIndexCatalog::new().with_table("users", &["id", "email"]);
/// let spec = IndexSpec::new("users", &["email"]).expect("spec");
///
/// let first = ensure_index(&mut catalog, &spec, InvalidIndexPolicy::FailFast);
/// let second = ensure_index(&mut catalog, &spec, InvalidIndexPolicy::FailFast);
/// assert_eq!(first, Ok(IndexAction::Created));
/// assert_eq!(second, Ok(IndexAction::Skipped));
/// ```
pub fn ensure_index(
    catalog: &mut dyn IndexCatalog,
    spec: &IndexSpec,
    policy: InvalidIndexPolicy,
) -> Result<IndexAction, IndexFailure> {
    verify_schema(catalog, spec)?;

    let state = observe_state(catalog, spec)?;
    match state {
        IndexState::PresentValid => {
            debug!(index = %spec.name(), "valid index already present");
            Ok(IndexAction::Skipped)
        }
        IndexState::Building => Err(IndexFailure::BuildInProgress),
        IndexState::PresentInvalid => match policy {
            InvalidIndexPolicy::FailFast => Err(IndexFailure::BuildInterrupted),
            InvalidIndexPolicy::DropAndRebuild => {
                warn!(index = %spec.name(), "dropping invalid index before rebuild");
                catalog.drop_index_concurrently(spec.name())?;
                let absent = state.apply(IndexTransition::Drop)?;
                build(catalog, spec, absent)?;
                Ok(IndexAction::Rebuilt)
            }
        },
        IndexState::Absent => {
            build(catalog, spec, state)?;
            Ok(IndexAction::Created)
        }
    }
}

fn verify_schema(catalog: &mut dyn IndexCatalog, spec: &IndexSpec) -> Result<(), IndexFailure> {
    let Some(columns) = catalog.table_columns(spec.table().as_str())? else {
        return Err(IndexFailure::schema_mismatch(format!(
            "table '{}' does not exist",
            spec.table()
        )));
    };

    for column in spec.referenced_columns() {
        if !columns.iter().any(|existing| existing == column.as_str()) {
            return Err(IndexFailure::schema_mismatch(format!(
                "column '{column}' does not exist on table '{}'",
                spec.table()
            )));
        }
    }
    Ok(())
}

fn observe_state(
    catalog: &mut dyn IndexCatalog,
    spec: &IndexSpec,
) -> Result<IndexState, IndexFailure> {
    let observation = catalog.observe_index(spec.name())?;
    if let Some(observed) = &observation {
        if observed.table != *spec.table() {
            return Err(IndexFailure::schema_mismatch(format!(
                "index name '{}' is already used on table '{}'",
                spec.name(),
                observed.table
            )));
        }
    }
    Ok(IndexState::observe(observation.as_ref()))
}

fn build(
    catalog: &mut dyn IndexCatalog,
    spec: &IndexSpec,
    state: IndexState,
) -> Result<(), IndexFailure> {
    let building = state.apply(IndexTransition::RequestBuild)?;
    info!(index = %spec.name(), table = %spec.table(), "building index concurrently");

    if let Err(error) = catalog.create_index_concurrently(spec) {
        let failure = IndexFailure::from(error);
        if failure == IndexFailure::BuildInterrupted || left_invalid(catalog, spec) {
            warn!(index = %spec.name(), error = %failure, "build failed and left an invalid index");
            building.apply(IndexTransition::BuildFailed)?;
            return Err(IndexFailure::BuildInterrupted);
        }
        return Err(failure);
    }

    match observe_state(catalog, spec)? {
        IndexState::PresentValid => {
            building.apply(IndexTransition::BuildSucceeded)?;
            Ok(())
        }
        IndexState::Building => Err(IndexFailure::BuildInProgress),
        IndexState::Absent | IndexState::PresentInvalid => {
            building.apply(IndexTransition::BuildFailed)?;
            Err(IndexFailure::BuildInterrupted)
        }
    }
}

/// Any failed concurrent build may leave its catalog entry behind; a lost
/// session makes the re-observation fail, in which case the original error
/// stands.
fn left_invalid(catalog: &mut dyn IndexCatalog, spec: &IndexSpec) -> bool {
    matches!(
        observe_state(catalog, spec),
        Ok(IndexState::PresentInvalid)
    )
}

/// Specs of one table, in plan order.
#[derive(Debug)]
struct TableGroup<'a> {
    position: usize,
    specs: Vec<(usize, &'a IndexSpec)>,
}

fn group_by_table(specs: &[IndexSpec]) -> Vec<TableGroup<'_>> {
    let mut groups: Vec<(&Identifier, TableGroup<'_>)> = Vec::new();
    for (position, spec) in specs.iter().enumerate() {
        match groups.iter_mut().find(|(table, _)| *table == spec.table()) {
            Some((_, group)) => group.specs.push((position, spec)),
            None => {
                let group = TableGroup {
                    position: groups.len(),
                    specs: vec![(position, spec)],
                };
                groups.push((spec.table(), group));
            }
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

#[derive(Debug)]
struct Failed {
    position: usize,
    index: IndexName,
    table: Identifier,
    failure: IndexFailure,
}

#[derive(Default)]
struct RunState {
    outcomes: Vec<(usize, IndexOutcome)>,
    failures: Vec<Failed>,
}

/// Service applying index specs through catalog sessions.
#[derive(Clone)]
pub struct IndexMigrationService {
    connector: Arc<dyn IndexCatalogConnector>,
    options: IndexMigrationOptions,
}

impl IndexMigrationService {
    /// Create a service over the given connector.
    pub fn new(connector: Arc<dyn IndexCatalogConnector>, options: IndexMigrationOptions) -> Self {
        Self { connector, options }
    }

    /// Options the service runs with.
    pub fn options(&self) -> IndexMigrationOptions {
        self.options
    }

    /// Bring every spec to present-valid, halting on the first failure.
    ///
    /// Outcomes are returned in plan order.
    pub fn apply(&self, specs: &[IndexSpec]) -> Result<Vec<IndexOutcome>, IndexMigrationError> {
        let groups = group_by_table(specs);
        let workers = self.options.parallel_tables.get().min(groups.len());
        let next_group = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let run = Mutex::new(RunState::default());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.drain_groups(&groups, &next_group, &halted, &run));
            }
        });

        let RunState {
            mut outcomes,
            mut failures,
        } = run.into_inner().unwrap_or_else(PoisonError::into_inner);
        outcomes.sort_by_key(|(position, _)| *position);
        let completed: Vec<IndexOutcome> =
            outcomes.into_iter().map(|(_, outcome)| outcome).collect();

        failures.sort_by_key(|failed| failed.position);
        let mut failures = failures.into_iter();
        let Some(first) = failures.next() else {
            return Ok(completed);
        };
        for other in failures {
            warn!(index = %other.index, error = %other.failure, "additional index failure");
        }
        Err(IndexMigrationError {
            index: first.index,
            table: first.table,
            failure: first.failure,
            completed,
        })
    }

    /// Report the current state of every spec without changing anything.
    pub fn inspect(&self, specs: &[IndexSpec]) -> Result<Vec<IndexStatus>, IndexCatalogError> {
        let mut catalog = self.connector.connect()?;
        specs
            .iter()
            .map(|spec| {
                let observation = catalog.observe_index(spec.name())?;
                Ok(IndexStatus {
                    index: spec.name().clone(),
                    table: spec.table().clone(),
                    state: IndexState::observe(observation.as_ref()),
                })
            })
            .collect()
    }

    fn drain_groups(
        &self,
        groups: &[TableGroup<'_>],
        next_group: &AtomicUsize,
        halted: &AtomicBool,
        run: &Mutex<RunState>,
    ) {
        let mut session: Option<Box<dyn IndexCatalog>> = None;
        loop {
            if halted.load(Ordering::SeqCst) {
                return;
            }
            let Some(group) = groups.get(next_group.fetch_add(1, Ordering::SeqCst)) else {
                return;
            };
            debug!(group = group.position, "processing table group");

            for &(position, spec) in &group.specs {
                if halted.load(Ordering::SeqCst) {
                    return;
                }

                let policy = self.options.invalid_index_policy;
                let result = match session.as_mut() {
                    Some(catalog) => ensure_index(catalog.as_mut(), spec, policy),
                    None => match self.connector.connect() {
                        Ok(catalog) => ensure_index(session.insert(catalog).as_mut(), spec, policy),
                        Err(error) => Err(IndexFailure::from(error)),
                    },
                };

                let mut state = run.lock().unwrap_or_else(PoisonError::into_inner);
                match result {
                    Ok(action) => {
                        info!(index = %spec.name(), table = %spec.table(), ?action, "index ensured");
                        state.outcomes.push((
                            position,
                            IndexOutcome {
                                index: spec.name().clone(),
                                table: spec.table().clone(),
                                action,
                            },
                        ));
                    }
                    Err(failure) => {
                        warn!(
                            index = %spec.name(),
                            table = %spec.table(),
                            error = %failure,
                            "index operation failed"
                        );
                        halted.store(true, Ordering::SeqCst);
                        state.failures.push(Failed {
                            position,
                            index: spec.name().clone(),
                            table: spec.table().clone(),
                            failure,
                        });
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "index_migration_tests.rs"]
mod tests;
