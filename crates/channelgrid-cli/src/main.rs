use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, FmtSubscriber};

use channelgrid_cli::output::{render_report, CheckSummary, OutputFormat};
use channelgrid_lib::{load_topology, ChannelEngine, EngineConfig, Topology, DEFAULT_MAX_PASSES};

#[derive(Parser, Debug)]
#[command(author, version, about = "Channel routing for capacity-limited node networks")]
struct Cli {
    /// Output format for command results.
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Write logs to stderr as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route every node of a topology file and print the result.
    Route {
        /// Path to a JSON topology document.
        topology: PathBuf,
        /// Maximum fixed-point passes before publishing partial routing.
        #[arg(long, default_value_t = DEFAULT_MAX_PASSES)]
        max_passes: usize,
        /// Wall-clock budget for the recompute in milliseconds.
        #[arg(long)]
        time_budget_ms: Option<u64>,
    },
    /// Validate a topology file and print node and segment counts.
    Check {
        /// Path to a JSON topology document.
        topology: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Route {
            topology,
            max_passes,
            time_budget_ms,
        } => {
            let mut config = EngineConfig::default().with_max_passes(max_passes);
            if let Some(ms) = time_budget_ms {
                config = config.with_time_budget(Duration::from_millis(ms));
            }
            handle_route(&topology, config, cli.format)
        }
        Command::Check { topology } => handle_check(&topology, cli.format),
    }
}

fn read_topology(path: &Path) -> Result<Topology> {
    load_topology(path)
        .with_context(|| format!("failed to load topology from {}", path.display()))
}

fn handle_route(path: &Path, config: EngineConfig, format: OutputFormat) -> Result<()> {
    let topology = read_topology(path)?;
    let mut engine = ChannelEngine::new(config);
    let report = engine.recompute(&topology);
    print!("{}", render_report(&report, format)?);
    Ok(())
}

fn handle_check(path: &Path, format: OutputFormat) -> Result<()> {
    let topology = read_topology(path)?;
    let summary = CheckSummary::from_topology(&topology);
    print!("{}", summary.render(format)?);
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_level(true)
            .flatten_event(true)
            .with_writer(std::io::stderr);
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
        return;
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
