//! Runner settings loaded via OrthoConfig.
//!
//! Values come from `INDEX_MIGRATOR_*` environment variables or a config
//! file; command-line flags given to the CLI take precedence over both.

use std::env;
use std::num::NonZeroUsize;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{IndexMigrationOptions, InvalidIndexPolicy};

/// Environment variable consulted when no database URL is configured.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Errors raised while resolving settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// No database URL was given anywhere.
    #[error("database URL missing: set --database-url, INDEX_MIGRATOR_DATABASE_URL, or DATABASE_URL")]
    MissingDatabaseUrl,
    /// A database URL was given but blank.
    #[error("{source_name} must not be empty")]
    EmptyDatabaseUrl {
        /// Where the blank value came from.
        source_name: &'static str,
    },
    /// `parallel_tables` was zero.
    #[error("parallel_tables must be at least 1")]
    ZeroParallelism,
}

/// Configuration values controlling an index migration run.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "INDEX_MIGRATOR")]
pub struct MigratorSettings {
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Number of tables whose indexes may be built at the same time.
    pub parallel_tables: Option<usize>,
    /// Drop and rebuild indexes left invalid by interrupted builds.
    #[ortho_config(default = false)]
    pub rebuild_invalid: bool,
}

impl MigratorSettings {
    /// Resolve the database URL: explicit value, then settings, then
    /// `DATABASE_URL`.
    pub fn resolve_database_url(&self, explicit: Option<String>) -> Result<String, SettingsError> {
        if let Some(value) = explicit {
            return non_blank(value, "--database-url");
        }
        if let Some(value) = self.database_url.clone() {
            return non_blank(value, "INDEX_MIGRATOR_DATABASE_URL");
        }
        let from_env = env::var(DATABASE_URL_ENV).map_err(|_| SettingsError::MissingDatabaseUrl)?;
        non_blank(from_env, DATABASE_URL_ENV)
    }

    /// Build service options, letting command-line values override settings.
    pub fn migration_options(
        &self,
        parallel_tables: Option<usize>,
        rebuild_invalid: bool,
    ) -> Result<IndexMigrationOptions, SettingsError> {
        let parallel_tables = match parallel_tables.or(self.parallel_tables) {
            Some(count) => NonZeroUsize::new(count).ok_or(SettingsError::ZeroParallelism)?,
            None => NonZeroUsize::MIN,
        };
        let invalid_index_policy = if rebuild_invalid || self.rebuild_invalid {
            InvalidIndexPolicy::DropAndRebuild
        } else {
            InvalidIndexPolicy::FailFast
        };
        Ok(IndexMigrationOptions {
            parallel_tables,
            invalid_index_policy,
        })
    }
}

fn non_blank(value: String, source_name: &'static str) -> Result<String, SettingsError> {
    if value.trim().is_empty() {
        return Err(SettingsError::EmptyDatabaseUrl { source_name });
    }
    Ok(value)
}
