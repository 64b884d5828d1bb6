//! Seed data and catalog checks for the club schema.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use postgres::config::{Config, Host};
use postgres::{Client, NoTls};

use super::format_postgres_error;

/// Soft-deleted users among the seeded ones.
pub const SOFT_DELETED_USERS: i64 = 10;

/// Token of one pending invitation in the seeded data.
pub const PENDING_INVITE_TOKEN: &str = "invite-token-25";

const UNPRIVILEGED_PASSWORD: &str = "migrator_password";
const BUILD_POLL_ATTEMPTS: usize = 200;
const BUILD_POLL_INTERVAL: Duration = Duration::from_millis(50);

const SEED_SQL: &str = r"
INSERT INTO clubs (id, name)
VALUES ('club-1', 'FC Nord'), ('club-2', 'AS Sud');

INSERT INTO users (id, email, hashed_password, name, plan, club_id, is_active, deleted_at)
SELECT
    'user-' || n,
    'user' || n || '@example.test',
    'hash',
    'User ' || n,
    'CLUB',
    CASE WHEN n % 2 = 0 THEN 'club-1' ELSE 'club-2' END,
    n % 10 <> 0,
    CASE WHEN n % 50 = 0 THEN NOW() - INTERVAL '3 days' END
FROM generate_series(1, 500) AS n;

INSERT INTO club_members (id, club_id, user_id, email, status, invite_token, invited_by)
SELECT
    'member-' || n,
    CASE WHEN n % 2 = 0 THEN 'club-1' ELSE 'club-2' END,
    CASE WHEN n % 25 = 0 THEN NULL ELSE 'user-' || n END,
    'user' || n || '@example.test',
    CASE WHEN n % 25 = 0 THEN 'pending' ELSE 'accepted' END,
    CASE WHEN n % 25 = 0 THEN 'invite-token-' || n END,
    'user-1'
FROM generate_series(1, 500) AS n;

INSERT INTO matches (id, club_id, user_id, opponent, date)
SELECT 'match-' || n, 'club-1', 'user-' || (n % 20 + 1), 'Opponent ' || n, NOW()
FROM generate_series(1, 200) AS n;

INSERT INTO players (id, club_id, user_id, name, position)
SELECT 'player-' || n, 'club-2', 'user-' || n, 'Player ' || n, 'MF'
FROM generate_series(1, 100) AS n;

ANALYZE;
";

/// Open a plain client.
pub fn connect(url: &str) -> Result<Client, String> {
    Client::connect(url, NoTls).map_err(|error| format_postgres_error(&error))
}

/// Run one or more statements outside a transaction.
pub fn execute(url: &str, sql: &str) -> Result<(), String> {
    connect(url)?
        .batch_execute(sql)
        .map_err(|error| format_postgres_error(&error))
}

/// Insert clubs, users, invitations, matches, and players.
pub fn seed_club_data(url: &str) -> Result<(), String> {
    execute(url, SEED_SQL)
}

/// Leave `ix_matches_user_id` behind as an invalid index.
///
/// A concurrent unique build over duplicate `user_id` values fails after the
/// catalog entry is created, which is exactly what an interrupted build
/// leaves behind.
pub fn leave_invalid_matches_index(url: &str) -> Result<(), String> {
    match execute(
        url,
        "CREATE UNIQUE INDEX CONCURRENTLY ix_matches_user_id ON matches (user_id)",
    ) {
        Ok(()) => Err("unique build unexpectedly succeeded".to_owned()),
        Err(_) => Ok(()),
    }
}

/// `(name, is_valid)` for every `ix_` index in the current schema.
pub fn hot_path_index_validity(url: &str) -> Result<Vec<(String, bool)>, String> {
    let query = concat!(
        "SELECT cls.relname AS index_name, idx.indisvalid AS is_valid ",
        "FROM pg_catalog.pg_index idx ",
        "JOIN pg_catalog.pg_class cls ON cls.oid = idx.indexrelid ",
        "JOIN pg_catalog.pg_namespace ns ON ns.oid = cls.relnamespace ",
        "WHERE ns.nspname = current_schema() ",
        "  AND cls.relname LIKE 'ix\\_%' ",
        "ORDER BY cls.relname"
    );
    let rows = connect(url)?
        .query(query, &[])
        .map_err(|error| format_postgres_error(&error))?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("index_name"), row.get("is_valid")))
        .collect())
}

/// `pg_get_indexdef` for the named index.
pub fn index_definition(url: &str, name: &str) -> Result<Option<String>, String> {
    let query = concat!(
        "SELECT pg_catalog.pg_get_indexdef(cls.oid) AS definition ",
        "FROM pg_catalog.pg_class cls ",
        "JOIN pg_catalog.pg_namespace ns ON ns.oid = cls.relnamespace ",
        "WHERE ns.nspname = current_schema() AND cls.relname = $1"
    );
    let row = connect(url)?
        .query_opt(query, &[&name])
        .map_err(|error| format_postgres_error(&error))?;
    Ok(row.map(|row| row.get("definition")))
}

/// Returns true when `name` resolves to a relation in the current schema.
pub fn relation_exists(url: &str, name: &str) -> Result<bool, String> {
    let row = connect(url)?
        .query_one("SELECT to_regclass($1::text) IS NOT NULL AS present", &[&name])
        .map_err(|error| format_postgres_error(&error))?;
    Ok(row.get("present"))
}

/// Create a login role that is neither superuser nor a member of
/// `pg_read_all_stats`, and return a connection string for it.
pub fn unprivileged_role_url(url: &str) -> Result<String, String> {
    let config: Config = url
        .parse()
        .map_err(|error: postgres::Error| format_postgres_error(&error))?;
    let dbname = config
        .get_dbname()
        .ok_or_else(|| format!("connection URL names no database: {url}"))?;
    let role: String = format!("migrator_{dbname}")
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(63)
        .collect();
    execute(
        url,
        &format!("CREATE ROLE {role} LOGIN NOSUPERUSER PASSWORD '{UNPRIVILEGED_PASSWORD}'"),
    )?;

    let host = match config.get_hosts().first() {
        Some(Host::Tcp(host)) => host.clone(),
        Some(Host::Unix(path)) => path.display().to_string(),
        None => "localhost".to_owned(),
    };
    let port = config.get_ports().first().copied().unwrap_or(5432);
    Ok(format!(
        "host={host} port={port} dbname={dbname} user={role} password={UNPRIVILEGED_PASSWORD}"
    ))
}

/// A `CREATE INDEX CONCURRENTLY` held in its "waiting for old snapshots"
/// phase by an open repeatable-read transaction.
///
/// The index stays invalid until [`ParkedBuild::release`] commits that
/// transaction. Dropping the value closes the snapshot session, which also
/// lets the build finish.
pub struct ParkedBuild {
    snapshot: Client,
    builder: JoinHandle<Result<(), String>>,
}

impl ParkedBuild {
    /// Commit the old snapshot and wait for the build to finish.
    pub fn release(mut self) -> Result<(), String> {
        self.snapshot
            .batch_execute("COMMIT")
            .map_err(|error| format_postgres_error(&error))?;
        self.builder
            .join()
            .map_err(|_| "index build thread panicked".to_owned())?
    }
}

/// Start `statement` (a concurrent build on `table`) and return once the
/// build is waiting on the snapshot this helper holds open.
pub fn park_concurrent_build(
    url: &str,
    statement: &str,
    table: &str,
) -> Result<ParkedBuild, String> {
    let mut snapshot = connect(url)?;
    snapshot
        .batch_execute("BEGIN ISOLATION LEVEL REPEATABLE READ; SELECT count(*) FROM clubs;")
        .map_err(|error| format_postgres_error(&error))?;

    let builder_url = url.to_owned();
    let builder_statement = statement.to_owned();
    let builder = thread::spawn(move || execute(&builder_url, &builder_statement));

    for _ in 0..BUILD_POLL_ATTEMPTS {
        if concurrent_build_waiting(url, table)? {
            return Ok(ParkedBuild { snapshot, builder });
        }
        if builder.is_finished() {
            return Err(format!("build on {table} finished before it could be parked"));
        }
        thread::sleep(BUILD_POLL_INTERVAL);
    }
    Err(format!("build on {table} never reached the snapshot wait"))
}

/// Returns true while a concurrent build on `table` waits for old
/// snapshots. Needs a role that can read `pg_stat_progress_create_index`.
pub fn concurrent_build_waiting(url: &str, table: &str) -> Result<bool, String> {
    let query = concat!(
        "SELECT EXISTS (",
        "  SELECT 1 FROM pg_catalog.pg_stat_progress_create_index progress ",
        "  WHERE progress.relid = to_regclass($1::text)::oid ",
        "    AND progress.command = 'CREATE INDEX CONCURRENTLY' ",
        "    AND progress.phase = 'waiting for old snapshots'",
        ") AS waiting"
    );
    let row = connect(url)?
        .query_one(query, &[&table])
        .map_err(|error| format_postgres_error(&error))?;
    Ok(row.get("waiting"))
}
