//! Shared helper utilities for integration tests.
//!
//! Integration tests compile as separate crates under `backend/tests/`, so
//! each suite pulls these helpers in with `mod support;`. Not every suite uses
//! every helper.
#![allow(dead_code)]

pub mod club_fixtures;
pub mod embedded_postgres;

const SKIP_TEST_CLUSTER: &str = "SKIP_TEST_CLUSTER";

/// Returns true when `SKIP_TEST_CLUSTER` is `1`, `true`, or `yes`, ignoring
/// case.
pub fn should_skip_test_cluster() -> bool {
    std::env::var(SKIP_TEST_CLUSTER).is_ok_and(|value| {
        ["1", "true", "yes"]
            .iter()
            .any(|truthy| value.trim().eq_ignore_ascii_case(truthy))
    })
}

/// Either skip (returning `None`) or fail loudly when the embedded cluster
/// cannot be prepared.
pub fn handle_cluster_setup_failure<T>(reason: impl std::fmt::Display) -> Option<T> {
    assert!(
        should_skip_test_cluster(),
        "embedded PostgreSQL unavailable: {reason}; set {SKIP_TEST_CLUSTER}=1 to skip"
    );
    eprintln!("SKIP-TEST-CLUSTER: {reason}");
    None
}

/// Render a `postgres` error with enough detail to be useful in CI logs.
///
/// The `postgres::Error` `Display` implementation collapses database errors
/// to a generic `db error`, which hides the message and SQLSTATE.
pub fn format_postgres_error(error: &postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut summary = format!(
        "postgres error {:?}: {}",
        db_error.code(),
        db_error.message()
    );
    if let Some(detail) = db_error.detail() {
        summary.push_str("; detail: ");
        summary.push_str(detail);
    }
    summary
}
