//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;
use bytesize::ByteSize;
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::Config;
use crate::observability;
use crate::stresstest::{self, Overrides};

/// Load generator probing the size limits of a Kubernetes API server.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Check(CheckCommand),
    Version(VersionCommand),
}

/// run the configured scenarios
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// only run the scenario with this name, can be repeated
    #[argh(option, short = 's')]
    scenario: Vec<String>,

    /// number of concurrent workers for every scenario
    #[argh(option)]
    concurrency: Option<usize>,

    /// number of requests for every scenario
    #[argh(option, short = 'n')]
    total: Option<u64>,

    /// payload size for every scenario, e.g. `500KiB`
    #[argh(option)]
    size: Option<ByteSize>,
}

/// check that the API server is reachable with the configured credentials
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "check")]
struct CheckCommand {}

/// print the kubestress version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("kubestress {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads.max(1))
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config.logging);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(command) => run(config, command).await,
            Command::Check(CheckCommand {}) => check(config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

async fn run(config: Config, command: RunCommand) -> Result<()> {
    let overrides = Overrides {
        only: command.scenario,
        concurrency: command.concurrency,
        total: command.total,
        payload_size: command.size,
    };
    let scenarios = overrides.apply(config.scenarios.clone())?;

    let client = ApiClient::connect(&config)
        .await
        .context("failed to connect to the API server")?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, waiting for in-flight requests");
                cancel.cancel();
            }
        }
    });

    stresstest::run(Arc::new(client), scenarios, cancel).await?;
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    let client = ApiClient::connect(&config)
        .await
        .context("failed to connect to the API server")?;
    let version = client.version().await?;

    println!("{} {version}", client.endpoint());
    Ok(())
}
