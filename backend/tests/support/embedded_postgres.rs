//! Embedded PostgreSQL provisioning for integration tests.
//!
//! Every test gets a fresh temporary database on the shared cluster with the
//! baseline schema applied through the embedded Diesel migrations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use pg_embedded_setup_unpriv::{ClusterHandle, TemporaryDatabase};

use super::handle_cluster_setup_failure;

/// Embedded migrations from the backend/migrations directory.
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const SHARED_CLUSTER_RETRIES: usize = 5;
const SHARED_CLUSTER_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Returns the process-wide embedded cluster, retrying transient failures.
pub fn shared_cluster() -> Result<&'static ClusterHandle, String> {
    ensure_stable_password();
    let mut attempt = 1;
    loop {
        match pg_embedded_setup_unpriv::test_support::shared_cluster_handle() {
            Ok(handle) => return Ok(handle),
            Err(error) if attempt < SHARED_CLUSTER_RETRIES => {
                eprintln!("pg-embed: attempt {attempt}/{SHARED_CLUSTER_RETRIES} failed: {error:?}");
                std::thread::sleep(SHARED_CLUSTER_RETRY_DELAY);
                attempt += 1;
            }
            Err(error) => return Err(format!("{error:?}")),
        }
    }
}

/// Keeps `PG_PASSWORD` stable across processes reusing one data directory.
///
/// `initdb` only runs once per data directory, so a randomly generated
/// password in a later process would fail authentication.
fn ensure_stable_password() {
    if std::env::var_os("PG_PASSWORD").is_none() {
        // SAFETY: runs before the cluster bootstrap spawns any threads.
        unsafe {
            std::env::set_var("PG_PASSWORD", "insightball_embedded_test");
        }
    }
}

/// Creates a temporary database with the baseline schema applied.
pub fn provision_database(cluster: &ClusterHandle) -> Result<TemporaryDatabase, String> {
    let database = cluster
        .temporary_database(temporary_database_name())
        .map_err(|error| format!("create temporary database: {error:?}"))?;
    migrate_schema(database.url())?;
    Ok(database)
}

/// Provisions a migrated database, or `None` when the cluster is unavailable
/// and `SKIP_TEST_CLUSTER` is set.
pub fn migrated_database_or_skip() -> Option<TemporaryDatabase> {
    let cluster = match shared_cluster() {
        Ok(cluster) => cluster,
        Err(reason) => return handle_cluster_setup_failure(reason),
    };
    match provision_database(cluster) {
        Ok(database) => Some(database),
        Err(reason) => handle_cluster_setup_failure(reason),
    }
}

/// Returns a database name unique to this process and call.
fn temporary_database_name() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos());
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test_{}_{nanos}_{sequence}", std::process::id())
}

/// Runs all pending Diesel migrations against the database.
pub fn migrate_schema(url: &str) -> Result<(), String> {
    let mut conn =
        PgConnection::establish(url).map_err(|error| format!("connect for migration: {error}"))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|error| format!("migration: {error:?}"))?;
    Ok(())
}
