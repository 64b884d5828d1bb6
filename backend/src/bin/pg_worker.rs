//! Helper binary `pg_embedded_setup_unpriv` runs when integration tests start
//! the embedded PostgreSQL cluster as root.
//!
//! Invocation: `pg_worker <setup|start|stop> <payload.json>`, where the
//! payload is a serialised [`pg_embedded_setup_unpriv::worker::WorkerPayload`].

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use color_eyre::eyre::{Context, Report, Result, bail, eyre};
use pg_embedded_setup_unpriv::worker::{PlainSecret, WorkerPayload};
use postgresql_embedded::PostgreSQL;
use tokio::runtime::Builder;

fn main() -> Result<()> {
    color_eyre::install()?;
    let invocation = Invocation::from_args(env::args_os())?;
    let payload = read_payload(&invocation.payload_path)?;
    invocation.lifecycle.run(payload)
}

/// Cluster lifecycle step requested by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Setup,
    Start,
    Stop,
}

impl FromStr for Lifecycle {
    type Err = Report;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "setup" => Ok(Self::Setup),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(eyre!(
                "unknown pg_worker operation '{other}'; expected setup, start, or stop"
            )),
        }
    }
}

impl Lifecycle {
    fn name(self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    fn run(self, payload: WorkerPayload) -> Result<()> {
        let settings = payload
            .settings
            .into_settings()
            .map_err(|error| Report::new(error).wrap_err("failed to rebuild postgres settings"))?;
        export_environment(payload.environment);

        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .wrap_err("failed to build pg_worker runtime")?;
        let mut postgres = PostgreSQL::new(settings);
        runtime
            .block_on(async move {
                match self {
                    Self::Setup => postgres.setup().await,
                    Self::Start => postgres.start().await,
                    Self::Stop => postgres.stop().await,
                }
            })
            .with_context(|| format!("embedded postgres {} failed", self.name()))
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    lifecycle: Lifecycle,
    payload_path: PathBuf,
}

impl Invocation {
    fn from_args(args: impl IntoIterator<Item = OsString>) -> Result<Self> {
        let mut args = args.into_iter().skip(1);
        let (Some(operation), Some(path)) = (args.next(), args.next()) else {
            bail!("usage: pg_worker <setup|start|stop> <payload.json>");
        };
        if let Some(extra) = args.next() {
            bail!(
                "unexpected extra argument: {}; expected only operation and payload path",
                extra.to_string_lossy()
            );
        }
        Ok(Self {
            lifecycle: operation.to_string_lossy().parse()?,
            payload_path: PathBuf::from(path),
        })
    }
}

fn read_payload(path: &Path) -> Result<WorkerPayload> {
    let raw = fs::read(path)
        .with_context(|| format!("failed to read worker payload at {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse worker payload at {}", path.display()))
}

fn export_environment(variables: Vec<(String, Option<PlainSecret>)>) {
    for (key, value) in variables {
        // SAFETY: runs on the main thread before the runtime spawns workers.
        match value {
            Some(value) => unsafe { env::set_var(&key, value.expose()) },
            None => unsafe { env::remove_var(&key) },
        }
    }
}
