//! swagent entry point.
//!
//! Loads configuration and an optional initial state, wires the derived-state
//! reactors into the update service and runs until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use swagent_state::SwitchState;
use tokio::sync::mpsc;
use tracing::{error, info};

use swagent::config::{AgentConfig, DEFAULT_CONFIG_PATH};
use swagent::nexthop_probe::{PendingEntryProber, ResolvedNexthopMonitor, ResolvedNexthopProbeScheduler};
use swagent::{supervise, FlowNexthopResolver, LookupClassUpdater, ResourceAccountant, SwitchAgent};

/// Switch agent state core
#[derive(Parser, Debug)]
#[command(name = "swagent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Switch state to start from, as JSON
    #[arg(short = 's', long)]
    initial_state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true).json())
            .init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn load_initial_state(path: Option<&Path>) -> anyhow::Result<SwitchState> {
    let Some(path) = path else {
        return Ok(SwitchState::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read initial state {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse initial state {}", path.display()))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AgentConfig::load_or_default(&args.config)?;
    config.validate()?;
    info!(
        switches = config.switches.len(),
        ecmp_resource_percentage = config.accountant.ecmp_resource_percentage,
        "Configuration loaded"
    );

    let initial = load_initial_state(args.initial_state.as_deref())?;
    let accountant = ResourceAccountant::new(config.capacity_table(), config.accountant.clone());
    let mut agent = SwitchAgent::new(initial, accountant)?;

    let (probe_tx, probe_rx) = mpsc::unbounded_channel();
    agent.register_observer(
        LookupClassUpdater::NAME,
        Box::new(LookupClassUpdater::new(agent.updater())),
    )?;
    agent.register_observer(
        ResolvedNexthopMonitor::NAME,
        Box::new(ResolvedNexthopMonitor::new(probe_tx)),
    )?;
    agent.register_observer(
        FlowNexthopResolver::NAME,
        Box::new(FlowNexthopResolver::new(agent.updater())),
    )?;

    let scheduler =
        ResolvedNexthopProbeScheduler::new(config.probe.start_interval(), config.probe.max_interval());
    let prober = PendingEntryProber::new(agent.updater());
    let probe_task = tokio::spawn(scheduler.run(probe_rx, prober, config.probe.tick()));

    let (handle, service) = agent.spawn();
    info!("swagent running");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown requested");
    };
    supervise(service, &handle, shutdown).await?;
    // The monitor's sender went away with the service, which ends the scheduler.
    probe_task.await.context("probe scheduler task failed")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level, args.json_logs);

    info!("--- Starting swagent ---");

    match run(args).await {
        Ok(()) => {
            info!("swagent exiting normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("swagent error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
