//! Hot query paths of the club management schema and the migrations derived
//! from them.

use super::index_policy::{
    ColumnAccess, IndexPolicyError, IndexSpec, TableAccessPattern, select_indexes,
};
use super::migration_runner::{IndexMigration, MigrationLog, MigrationLogError};

/// Version of the migration adding the hot-path secondary indexes.
pub const HOT_PATH_MIGRATION_VERSION: &str = "2026-03-02-000000_add_hot_path_indexes";

const HOT_PATH_MIGRATION_DESCRIPTION: &str =
    "Add concurrent secondary indexes for users, club_members, matches, and players";

/// Access patterns observed on the four hot tables.
pub fn hot_path_access_patterns() -> Vec<TableAccessPattern<'static>> {
    vec![
        TableAccessPattern {
            table: "users",
            accesses: vec![
                // login and invitation matching
                ColumnAccess::lookup("email"),
                ColumnAccess::join_key("club_id"),
                ColumnAccess::filter("is_active"),
                // account recovery and purge of soft-deleted accounts
                ColumnAccess::filter("deleted_at").mostly_null(),
            ],
        },
        TableAccessPattern {
            table: "club_members",
            accesses: vec![
                ColumnAccess::join_key("club_id"),
                ColumnAccess::join_key("user_id"),
                // invitation redemption; the token is cleared once accepted
                ColumnAccess::lookup("invite_token").mostly_null(),
                ColumnAccess::filter("status"),
            ],
        },
        TableAccessPattern {
            table: "matches",
            accesses: vec![
                ColumnAccess::join_key("user_id"),
                ColumnAccess::join_key("club_id"),
            ],
        },
        TableAccessPattern {
            table: "players",
            accesses: vec![
                ColumnAccess::join_key("club_id"),
                ColumnAccess::join_key("user_id"),
            ],
        },
    ]
}

/// The twelve hot-path index specs.
///
/// # Examples
///
/// ```rust
/// use insightball_migrations::domain::hot_path_indexes;
///
/// let specs = hot_path_indexes().expect("hot path specs");
/// assert_eq!(specs.len(), 12);
/// assert_eq!(specs[0].name().as_str(), "ix_users_email");
/// ```
pub fn hot_path_indexes() -> Result<Vec<IndexSpec>, IndexPolicyError> {
    select_indexes(&hot_path_access_patterns())
}

/// Ordered log of every index migration shipped with this crate.
pub fn migration_log() -> Result<MigrationLog, MigrationLogError> {
    let hot_paths = IndexMigration::new(
        HOT_PATH_MIGRATION_VERSION,
        HOT_PATH_MIGRATION_DESCRIPTION,
        hot_path_indexes()?,
    )?;
    MigrationLog::new(vec![hot_paths])
}
