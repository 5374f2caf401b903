use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};
use tracing_subscriber::prelude::*;

use engine_client::{ClientConfig, EngineClient, load_config};

mod cli;

#[derive(Parser)]
#[command(name = "enginectl")]
#[command(about = "Attach to containers and follow their output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Daemon address, e.g. unix:///var/run/docker.sock or tcp://host:2376
    #[arg(long, global = true)]
    host: Option<String>,

    /// Config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a running container's stdio
    Attach(cli::AttachArgs),

    /// Run a command inside a running container
    Exec(cli::ExecArgs),

    /// Print a container's logs
    Logs(cli::LogsArgs),

    /// Stream resource usage samples
    Stats(cli::StatsArgs),

    /// Show metadata for a path inside a container
    StatPath(cli::StatPathArgs),

    /// Print the effective configuration
    Config,
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "enginectl=debug,engine_client=debug,info"
    } else {
        "enginectl=info,engine_client=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn load(cli: &Cli) -> Result<ClientConfig> {
    let mut figment = load_config(cli.config.as_deref());
    if let Some(host) = &cli.host {
        figment = figment.merge(("host", host));
    }
    ClientConfig::from_figment(figment).context("Failed to load client configuration")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = load(&cli)?;
    if let Commands::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let client = EngineClient::new(config).context("Failed to set up daemon client")?;

    // Ctrl-C cancels whatever is in flight; sessions close their connection.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received");
            on_interrupt.cancel();
        }
    });

    let run = async move {
        match cli.command {
            Commands::Attach(args) => cli::attach_command(&client, args, &cancel).await,
            Commands::Exec(args) => cli::exec_command(&client, args, &cancel).await,
            Commands::Logs(args) => cli::logs_command(&client, args, &cancel).await,
            Commands::Stats(args) => cli::stats_command(&client, args, &cancel).await,
            Commands::StatPath(args) => cli::stat_path_command(&client, args, &cancel).await,
            Commands::Config => Ok(ExitCode::SUCCESS),
        }
    };
    run.instrument(info_span!("enginectl")).await
}
