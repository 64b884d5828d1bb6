//! Rendering and classification of `postgres` client errors.

use postgres::error::SqlState;

use crate::domain::ports::IndexCatalogError;

/// Render a `postgres` error with its SQLSTATE and server-side detail.
///
/// The `Display` implementation collapses database errors to `db error`,
/// which hides the message operators need.
pub(crate) fn format_postgres_error(error: &postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut summary = format!(
        "postgres error {}: {}",
        db_error.code().code(),
        db_error.message()
    );
    if let Some(detail) = db_error.detail() {
        summary.push_str("; detail: ");
        summary.push_str(detail);
    }
    if let Some(hint) = db_error.hint() {
        summary.push_str("; hint: ");
        summary.push_str(hint);
    }
    summary
}

/// Classify a failed catalog query.
pub(crate) fn map_query_error(error: &postgres::Error) -> IndexCatalogError {
    let message = format_postgres_error(error);
    if error.is_closed() {
        IndexCatalogError::connection(message)
    } else {
        IndexCatalogError::query(message)
    }
}

/// Classify a failed `CREATE`/`DROP INDEX CONCURRENTLY`.
///
/// Cancellation, shutdown, deadlock, and a lost session all leave the index
/// behind as invalid, so they map to a build interruption.
pub(crate) fn map_ddl_error(error: &postgres::Error) -> IndexCatalogError {
    let message = format_postgres_error(error);
    if error.is_closed() {
        return IndexCatalogError::build_interrupted(message);
    }
    match error.code() {
        Some(code) if is_schema_mismatch(code) => IndexCatalogError::schema_mismatch(message),
        Some(code) if is_interruption(code) => IndexCatalogError::build_interrupted(message),
        _ => IndexCatalogError::query(message),
    }
}

fn is_schema_mismatch(code: &SqlState) -> bool {
    [
        SqlState::UNDEFINED_TABLE,
        SqlState::UNDEFINED_COLUMN,
        SqlState::INVALID_SCHEMA_NAME,
    ]
    .contains(code)
}

fn is_interruption(code: &SqlState) -> bool {
    [
        SqlState::QUERY_CANCELED,
        SqlState::ADMIN_SHUTDOWN,
        SqlState::CRASH_SHUTDOWN,
        SqlState::CANNOT_CONNECT_NOW,
        SqlState::T_R_DEADLOCK_DETECTED,
        SqlState::T_R_SERIALIZATION_FAILURE,
        SqlState::LOCK_NOT_AVAILABLE,
    ]
    .contains(code)
}
