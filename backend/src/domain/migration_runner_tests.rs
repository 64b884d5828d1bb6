//! Tests for the migration log, ledger delta, and runner.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rstest::{fixture, rstest};

use super::*;
use crate::domain::index_migration::{IndexMigrationOptions, InvalidIndexPolicy};
use crate::domain::index_state::IndexState;
use crate::domain::ports::MockMigrationLedger;
use crate::test_support::{FixedClock, InMemoryIndexCatalog, InMemoryMigrationLedger};

fn applied_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

fn migration(version: &str, specs: &[(&str, &str)]) -> IndexMigration {
    let specs = specs
        .iter()
        .map(|&(table, column)| IndexSpec::new(table, &[column]).expect("spec"))
        .collect();
    IndexMigration::new(version, format!("migration {version}"), specs).expect("migration")
}

fn entry_for(migration: &IndexMigration) -> LedgerEntry {
    LedgerEntry {
        version: migration.version().to_owned(),
        description: migration.description().to_owned(),
        checksum: migration.checksum(),
        applied_at: applied_at(),
    }
}

#[fixture]
fn two_step_log() -> MigrationLog {
    MigrationLog::new(vec![
        migration("0001_players", &[("players", "club_id")]),
        migration("0002_matches", &[("matches", "user_id"), ("matches", "club_id")]),
    ])
    .expect("log")
}

#[fixture]
fn catalog() -> InMemoryIndexCatalog {
    InMemoryIndexCatalog::new()
        .with_table("players", &["id", "club_id"])
        .with_table("matches", &["id", "user_id", "club_id"])
}

fn runner(
    log: MigrationLog,
    catalog: &InMemoryIndexCatalog,
    ledger: Arc<dyn MigrationLedger>,
    policy: InvalidIndexPolicy,
) -> MigrationRunner {
    let options = IndexMigrationOptions {
        invalid_index_policy: policy,
        ..IndexMigrationOptions::default()
    };
    MigrationRunner::new(
        log,
        ledger,
        IndexMigrationService::new(Arc::new(catalog.clone()), options),
        Arc::new(FixedClock(applied_at())),
    )
}

#[rstest]
fn checksum_is_stable_hex_sha256() {
    let first = migration("0001", &[("players", "club_id")]);
    let second = migration("0001", &[("players", "club_id")]);
    assert_eq!(first.checksum(), second.checksum());
    assert_eq!(first.checksum().len(), 64);
    assert!(first.checksum().chars().all(|ch| ch.is_ascii_hexdigit()));
}

#[rstest]
fn checksum_changes_with_the_ddl() {
    let full = IndexMigration::new(
        "0001",
        "users",
        vec![IndexSpec::new("users", &["deleted_at"]).expect("spec")],
    )
    .expect("migration");
    let partial = IndexMigration::new(
        "0001",
        "users",
        vec![IndexSpec::partial_not_null("users", "deleted_at").expect("spec")],
    )
    .expect("migration");
    assert_ne!(full.checksum(), partial.checksum());
}

#[rstest]
fn migration_rejects_blank_version() {
    assert_eq!(
        IndexMigration::new("  ", "blank", Vec::new()),
        Err(MigrationLogError::EmptyVersion)
    );
}

#[rstest]
fn log_rejects_duplicate_versions() {
    let error = MigrationLog::new(vec![
        migration("0001", &[("players", "club_id")]),
        migration("0001", &[("players", "user_id")]),
    ])
    .expect_err("duplicate");
    assert_eq!(
        error,
        MigrationLogError::DuplicateVersion {
            version: "0001".to_owned()
        }
    );
}

#[rstest]
fn log_rejects_out_of_order_versions() {
    let error = MigrationLog::new(vec![
        migration("0002", &[("players", "club_id")]),
        migration("0001", &[("players", "user_id")]),
    ])
    .expect_err("out of order");
    assert_eq!(
        error,
        MigrationLogError::OutOfOrder {
            version: "0001".to_owned()
        }
    );
}

#[rstest]
fn pending_returns_unrecorded_migrations_in_order(two_step_log: MigrationLog) {
    let first = two_step_log.iter().next().expect("first migration");
    let delta = pending(&two_step_log, &[entry_for(first)]).expect("no drift");
    let versions: Vec<&str> = delta.iter().map(|migration| migration.version()).collect();
    assert_eq!(versions, vec!["0002_matches"]);
}

#[rstest]
fn pending_detects_checksum_drift(two_step_log: MigrationLog) {
    let first = two_step_log.iter().next().expect("first migration");
    let mut tampered = entry_for(first);
    tampered.checksum = "0".repeat(64);

    let drift = pending(&two_step_log, &[tampered]).expect_err("drift");

    assert_eq!(drift.version, "0001_players");
    assert_eq!(drift.expected, first.checksum());
}

#[rstest]
fn pending_ignores_unknown_ledger_versions(two_step_log: MigrationLog) {
    let stray = LedgerEntry {
        version: "0000_retired".to_owned(),
        description: "retired".to_owned(),
        checksum: "abc".to_owned(),
        applied_at: applied_at(),
    };
    let delta = pending(&two_step_log, &[stray]).expect("no drift");
    assert_eq!(delta.len(), 2);
}

#[rstest]
fn run_applies_and_records_every_pending_migration(
    two_step_log: MigrationLog,
    catalog: InMemoryIndexCatalog,
) {
    let ledger = InMemoryMigrationLedger::new();
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger.clone()),
        InvalidIndexPolicy::FailFast,
    );

    let report = runner.run().expect("run succeeds");

    let versions: Vec<&str> = report
        .applied
        .iter()
        .map(|applied| applied.version.as_str())
        .collect();
    assert_eq!(versions, vec!["0001_players", "0002_matches"]);
    let recorded = ledger.entries();
    assert_eq!(recorded.len(), 2);
    assert!(recorded.iter().all(|entry| entry.applied_at == applied_at()));
    assert_eq!(catalog.valid_index_count(), 3);
}

#[rstest]
fn second_run_is_a_noop(two_step_log: MigrationLog, catalog: InMemoryIndexCatalog) {
    let ledger = InMemoryMigrationLedger::new();
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger.clone()),
        InvalidIndexPolicy::FailFast,
    );
    runner.run().expect("first run");
    let creates = catalog.create_calls();

    let report = runner.run().expect("second run");

    assert!(report.is_noop());
    assert!(runner.pending_versions().expect("pending").is_empty());
    assert_eq!(catalog.create_calls(), creates);
}

#[rstest]
fn failing_migration_is_not_recorded_and_halts_the_sequence(
    two_step_log: MigrationLog,
    catalog: InMemoryIndexCatalog,
) {
    let catalog = catalog.with_invalid_index("matches", "ix_matches_user_id");
    let ledger = InMemoryMigrationLedger::new();
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger.clone()),
        InvalidIndexPolicy::FailFast,
    );

    let error = runner.run().expect_err("invalid index halts the run");

    let (version, source) = match error {
        MigrationRunError::Migration { version, source } => (version, source),
        other => panic!("expected a migration failure, got {other:?}"),
    };
    assert_eq!(version, "0002_matches");
    assert_eq!(source.index.as_str(), "ix_matches_user_id");
    let recorded: Vec<String> = ledger.entries().into_iter().map(|e| e.version).collect();
    assert_eq!(recorded, vec!["0001_players".to_owned()]);
}

#[rstest]
fn drift_aborts_before_any_ddl(two_step_log: MigrationLog, catalog: InMemoryIndexCatalog) {
    let first = two_step_log.iter().next().expect("first migration");
    let mut tampered = entry_for(first);
    tampered.checksum = "f".repeat(64);
    let ledger = InMemoryMigrationLedger::new().with_entry(tampered);
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger),
        InvalidIndexPolicy::FailFast,
    );

    let error = runner.run().expect_err("drift");

    assert!(matches!(error, MigrationRunError::Drift(_)));
    assert!(catalog.statements().is_empty());
}

#[rstest]
fn ledger_read_failure_is_propagated(two_step_log: MigrationLog, catalog: InMemoryIndexCatalog) {
    let mut ledger = MockMigrationLedger::new();
    ledger
        .expect_applied()
        .times(1)
        .returning(|| Err(MigrationLedgerError::connection("refused")));
    ledger.expect_record().never();
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger),
        InvalidIndexPolicy::FailFast,
    );

    let error = runner.run().expect_err("ledger unavailable");

    assert!(matches!(
        error,
        MigrationRunError::Ledger(MigrationLedgerError::Connection { .. })
    ));
}

#[rstest]
fn status_reports_ledger_and_live_state(
    two_step_log: MigrationLog,
    catalog: InMemoryIndexCatalog,
) {
    let first = two_step_log.iter().next().expect("first migration");
    let ledger = InMemoryMigrationLedger::new().with_entry(entry_for(first));
    let catalog = catalog
        .with_valid_index("players", "ix_players_club_id")
        .with_invalid_index("matches", "ix_matches_user_id");
    let runner = runner(
        two_step_log,
        &catalog,
        Arc::new(ledger),
        InvalidIndexPolicy::DropAndRebuild,
    );

    let statuses = runner.status().expect("status");

    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].recorded);
    assert!(!statuses[1].recorded);
    let states: Vec<IndexState> = statuses[1]
        .indexes
        .iter()
        .map(|status| status.state)
        .collect();
    assert_eq!(states, vec![IndexState::PresentInvalid, IndexState::Absent]);
    assert_eq!(catalog.drop_calls(), 0);
}
