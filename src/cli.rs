use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Settings, WorkerConfig};
use crate::shared::SharedCell;
use crate::signals;
use crate::worker::Worker;

/// How often the target count is checked in `run --count`
const COUNT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "mpworker")]
#[command(about = "mpworker - run a function periodically in a forked worker process", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a shared-counter worker until SIGINT/SIGTERM or until it reaches --count
    Run {
        /// Worker name (overrides config)
        #[arg(long)]
        name: Option<String>,

        /// Interval between runs, e.g. "500ms", "2s" (overrides config)
        #[arg(long)]
        interval: Option<String>,

        /// Wait one full interval before the first run
        #[arg(long)]
        no_first_run: bool,

        /// Stop the worker once the counter reaches this value
        #[arg(long)]
        count: Option<u32>,

        /// Fail every Nth run; failures go to the error callback
        #[arg(long)]
        fail_every: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with already parsed arguments
pub async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    match cli.command {
        Commands::Run {
            name,
            interval,
            no_first_run,
            count,
            fail_every,
        } => {
            let settings = Settings::builder()
                .config_path(cli.config)
                .name(name)
                .interval(interval)
                .first_run_immediate(no_first_run.then_some(false))
                .build()?;

            let config = settings.worker.worker_config()?;
            run_counter(config, count, fail_every).await?;
        }

        Commands::Config => {
            let settings = Settings::builder().config_path(cli.config).build()?;
            let rendered =
                toml::to_string_pretty(&settings).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
    }

    Ok(())
}

async fn run_counter(
    config: WorkerConfig,
    count: Option<u32>,
    fail_every: Option<u32>,
) -> Result<()> {
    let counter = SharedCell::new(0u32).context("Failed to allocate shared counter")?;
    let name = config.name().to_string();
    let fail_every = fail_every.filter(|every| *every > 0);

    let run_name = name.clone();
    let callback_name = name.clone();
    let mut worker = Worker::builder(
        config.name(),
        config.interval(),
        move |counter: &SharedCell<u32>| {
            let run = {
                let mut value = counter.lock()?;
                *value += 1;
                *value
            };
            if let Some(every) = fail_every {
                if run % every == 0 {
                    anyhow::bail!("simulated failure on run {}", run);
                }
            }
            println!("{}: run {}", run_name, run);
            Ok(())
        },
        counter.clone(),
    )
    .first_run_immediate(config.first_run_immediate())
    .error_callback(move |error| eprintln!("{}: {:#}", callback_name, error))
    .build()?;

    let shutdown =
        signals::install_shutdown_handler().context("Failed to install signal handlers")?;

    worker.start()?;

    tokio::select! {
        _ = shutdown.cancelled() => {}
        reached = wait_for_count(&counter, count) => {
            reached?;
            tracing::info!(worker = %name, "target count reached");
        }
    }

    tokio::task::spawn_blocking(move || worker.stop())
        .await
        .context("Stop task failed")??;

    println!("{} stopped after {} run(s)", name, counter.get()?);
    Ok(())
}

async fn wait_for_count(counter: &SharedCell<u32>, count: Option<u32>) -> Result<()> {
    let Some(target) = count else {
        std::future::pending::<()>().await;
        return Ok(());
    };

    let mut ticker = tokio::time::interval(COUNT_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if counter.get()? >= target {
            return Ok(());
        }
    }
}
