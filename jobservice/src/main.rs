//! Command line entry point for the job service.

use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use eyre::{eyre, WrapErr as _};
use jobservice::audit::MemoryAuditLog;
use jobservice::config::Config;
use jobservice::{JobContext, Parameters};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jobservice", about = "Run replication and maintenance jobs")]
struct Args {
    /// Configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the registered adapter types.
    Adapters,

    /// Run a single job in this process.
    ///
    /// The audit log and `memory` registries are in-process stores which start
    /// empty, so only list-export destinations have effects outside the run.
    Run {
        /// Job name, e.g. REPLICATION.
        job: String,

        /// JSON object holding the job parameters.
        #[arg(long, value_name = "FILE")]
        params: Option<Utf8PathBuf>,

        /// Validate the parameters and stop.
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_params(path: Option<&Utf8PathBuf>) -> eyre::Result<Option<Parameters>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let source = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {path}"))?;
    let params = serde_json::from_str(&source).wrap_err_with(|| format!("parsing {path}"))?;
    Ok(Some(params))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    let adapters = jobservice::adapter_registry(config.endpoint()?)?;

    match args.command {
        Command::Adapters => {
            let mut types: Vec<_> = adapters.registered_types().into_iter().collect();
            types.sort();
            for registry_type in types {
                println!("{registry_type}");
            }
            Ok(())
        }
        Command::Run {
            job,
            params,
            dry_run,
        } => {
            let catalog = jobservice::catalog(
                adapters,
                Arc::new(MemoryAuditLog::default()),
                config.replication.chunk_size,
            );
            let job = catalog.get(&job).ok_or_else(|| {
                let known: Vec<_> = catalog.names().collect();
                eyre!("unknown job {job}, expected one of {}", known.join(", "))
            })?;

            let params = load_params(params.as_ref())?;
            if dry_run {
                job.validate(params.as_ref())?;
                tracing::info!(job = job.name(), "parameters are valid");
                return Ok(());
            }

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupted, cancelling job");
                        cancel.cancel();
                    }
                }
            });

            let ctx = JobContext::with_cancellation(job.name(), cancel);
            let execution = jobservice::policy::execute(job.as_ref(), &ctx, params.as_ref()).await;
            match execution.error {
                None => Ok(()),
                Some(error) => Err(eyre::Report::new(error).wrap_err(format!(
                    "{} failed after {} attempt(s)",
                    job.name(),
                    execution.attempts
                ))),
            }
        }
    }
}
