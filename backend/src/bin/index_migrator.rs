//! Plan, inspect, and apply the Insightball secondary index migrations.
//!
//! # Examples
//! ```sh
//! index-migrator plan
//! index-migrator --database-url postgres://localhost/insightball status --json
//! index-migrator apply --parallel-tables 2 --rebuild-invalid
//! ```
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]

use std::ffi::OsString;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use insightball_migrations::config::MigratorSettings;
use insightball_migrations::domain::{
    IndexAction, IndexMigrationService, MigrationLog, MigrationRunner, MigrationStatus, RunReport,
    migration_log,
};
use insightball_migrations::outbound::persistence::{
    DieselMigrationLedger, PostgresIndexCatalogConnector,
};
use mockable::DefaultClock;
use ortho_config::OrthoConfig;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// `index-migrator` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "index-migrator",
    about = "Build secondary indexes concurrently and idempotently",
    version
)]
struct CliArgs {
    /// Database connection URL. Falls back to configuration, then `DATABASE_URL`.
    #[arg(long = "database-url", value_name = "url", global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print the DDL every migration would issue, without connecting.
    Plan,
    /// Print the ledger and live state of every index.
    Status {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Apply pending migrations and record them in the ledger.
    Apply {
        /// Drop and rebuild indexes left invalid by interrupted builds.
        #[arg(long = "rebuild-invalid")]
        rebuild_invalid: bool,
        /// Number of tables whose indexes may be built at the same time.
        #[arg(long = "parallel-tables", value_name = "count")]
        parallel_tables: Option<usize>,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let args = CliArgs::parse();
    let settings = MigratorSettings::load_from_iter([OsString::from("index-migrator")])
        .map_err(|error| eyre!("failed to load index migrator settings: {error}"))?;
    let log = migration_log().wrap_err("invalid index migration log")?;

    match args.command {
        Command::Plan => {
            print!("{}", render_plan(&log).wrap_err("failed to render plan")?);
        }
        Command::Status { json } => {
            let runner = build_runner(&settings, args.database_url, log, None, false)?;
            let statuses = runner.status().wrap_err("failed to read index status")?;
            if json {
                let rendered = serde_json::to_string_pretty(&statuses)
                    .wrap_err("failed to serialise index status")?;
                println!("{rendered}");
            } else {
                print!(
                    "{}",
                    render_status(&statuses).wrap_err("failed to render index status")?
                );
            }
        }
        Command::Apply {
            rebuild_invalid,
            parallel_tables,
        } => {
            let runner = build_runner(
                &settings,
                args.database_url,
                log,
                parallel_tables,
                rebuild_invalid,
            )?;
            let report = runner.run().wrap_err("index migration failed")?;
            print!(
                "{}",
                render_report(&report).wrap_err("failed to render run report")?
            );
        }
    }
    Ok(())
}

fn build_runner(
    settings: &MigratorSettings,
    explicit_url: Option<String>,
    log: MigrationLog,
    parallel_tables: Option<usize>,
    rebuild_invalid: bool,
) -> Result<MigrationRunner> {
    let database_url = settings.resolve_database_url(explicit_url)?;
    let options = settings.migration_options(parallel_tables, rebuild_invalid)?;
    let service = IndexMigrationService::new(
        Arc::new(PostgresIndexCatalogConnector::new(database_url.as_str())),
        options,
    );
    Ok(MigrationRunner::new(
        log,
        Arc::new(DieselMigrationLedger::new(database_url)),
        service,
        Arc::new(DefaultClock),
    ))
}

fn render_plan(log: &MigrationLog) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for migration in log.iter() {
        writeln!(out, "-- {}: {}", migration.version(), migration.description())?;
        for spec in migration.specs() {
            writeln!(out, "{};", spec.create_statement())?;
        }
    }
    Ok(out)
}

fn render_status(statuses: &[MigrationStatus]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    for status in statuses {
        let recorded = if status.recorded { "recorded" } else { "pending" };
        writeln!(out, "{} ({recorded})", status.version)?;
        for index in &status.indexes {
            writeln!(out, "  {:<32} {:<14} {}", index.index, index.table, index.state)?;
        }
    }
    Ok(out)
}

fn render_report(report: &RunReport) -> Result<String, fmt::Error> {
    if report.is_noop() {
        return Ok("no pending index migrations\n".to_owned());
    }
    let mut out = String::new();
    for applied in &report.applied {
        writeln!(out, "applied {}", applied.version)?;
        for outcome in &applied.outcomes {
            writeln!(out, "  {:<32} {}", outcome.index, action_label(outcome.action))?;
        }
    }
    Ok(out)
}

fn action_label(action: IndexAction) -> &'static str {
    match action {
        IndexAction::Created => "created",
        IndexAction::Skipped => "skipped",
        IndexAction::Rebuilt => "rebuilt",
    }
}
