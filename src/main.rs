use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use node_idle_labeler::config::ConfigLayer;
use node_idle_labeler::controller::{self, Reconciler};
use node_idle_labeler::monitor::{PowerSupply, Sampler, SystemTelemetry};
use node_idle_labeler::node::{
    resolve_node_name, DryRunNodeClient, KubeNodeClient, NodeClient, IDLE_KEY,
};
use node_idle_labeler::{Error, ThresholdConfig};
use tokio::io::BufReader;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample telemetry and reconcile the node in one process
    Run(RunArgs),
    /// Sample telemetry and print one status line per sample to stdout
    Monitor(MonitorArgs),
    /// Read status lines from stdin and reconcile the node
    Label(LabelArgs),
    /// Show the node's current idle label and taint
    Info(InfoArgs),
    /// Show version and build information
    Version,
}

#[derive(Parser, Debug)]
struct ThresholdArgs {
    /// TOML file with threshold settings
    #[arg(long, env = "IDLE_LABELER_CONFIG")]
    config: Option<PathBuf>,

    /// CPU percent below which the machine is idle
    #[arg(long, env = "CPU_IDLE_THRESHOLD")]
    cpu_idle_threshold: Option<f64>,

    /// Battery percent at or above which unplugged power is sufficient
    #[arg(long, env = "BATTERY_THRESHOLD")]
    battery_threshold: Option<f64>,

    /// Container share of CPU (0-1) at or below which high CPU is foreground load
    #[arg(long, env = "CONTAINER_RATIO_THRESHOLD")]
    container_ratio_threshold: Option<f64>,

    /// Seconds between samples
    #[arg(long, env = "SAMPLE_INTERVAL_SECS")]
    sample_interval_secs: Option<u64>,

    /// Milliseconds over which CPU usage is measured
    #[arg(long, env = "MEASUREMENT_WINDOW_MS")]
    measurement_window_ms: Option<u64>,
}

#[derive(Parser, Debug)]
struct NodeArgs {
    /// Node name (defaults to the lowercased hostname)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Log label and taint changes without applying them
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    thresholds: ThresholdArgs,

    #[command(flatten)]
    node: NodeArgs,
}

#[derive(Parser, Debug)]
struct MonitorArgs {
    #[command(flatten)]
    thresholds: ThresholdArgs,
}

#[derive(Parser, Debug)]
struct LabelArgs {
    #[command(flatten)]
    thresholds: ThresholdArgs,

    #[command(flatten)]
    node: NodeArgs,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// TOML file with threshold settings
    #[arg(long, env = "IDLE_LABELER_CONFIG")]
    config: Option<PathBuf>,

    /// Node name (defaults to the lowercased hostname)
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,
}

impl ThresholdArgs {
    /// Defaults, then the config file, then flags and environment
    fn load(&self, node_name: Option<String>) -> Result<(ThresholdConfig, ConfigLayer), Error> {
        let file = match &self.config {
            Some(path) => ConfigLayer::load(path)?,
            None => ConfigLayer::default(),
        };
        let cli = ConfigLayer {
            cpu_idle_threshold: self.cpu_idle_threshold,
            battery_threshold: self.battery_threshold,
            container_ratio_threshold: self.container_ratio_threshold,
            sample_interval_secs: self.sample_interval_secs,
            measurement_window_ms: self.measurement_window_ms,
            node_name,
        };
        let layer = file.merge(cli);
        let config = layer.resolve()?;
        Ok((config, layer))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("node-idle-labeler v{}", env!("CARGO_PKG_VERSION"));
        println!("Build Date: {}", env!("BUILD_DATE"));
        println!("Git SHA: {}", env!("GIT_SHA"));
        println!("Rust Version: {}", env!("RUST_VERSION"));
        return Ok(());
    }

    init_tracing(args.log_format);

    match args.command {
        Commands::Run(run_args) => run(run_args).await,
        Commands::Monitor(monitor_args) => monitor(monitor_args).await,
        Commands::Label(label_args) => label(label_args).await,
        Commands::Info(info_args) => show_info(info_args).await,
        Commands::Version => Ok(()),
    }
}

/// Logs go to stderr; stdout carries status lines in monitor mode
fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

/// Resolves on Ctrl-C / SIGINT
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn start_telemetry(config: &Arc<ThresholdConfig>) -> anyhow::Result<Sampler<SystemTelemetry>> {
    let telemetry =
        SystemTelemetry::new(PowerSupply::default()).context("telemetry initialization failed")?;
    Ok(Sampler::new(telemetry, config.clone()))
}

async fn kube_client() -> anyhow::Result<KubeNodeClient> {
    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)
        .context("cannot connect to the Kubernetes API")?;
    info!("Connected to Kubernetes cluster");
    Ok(KubeNodeClient::new(client))
}

async fn log_initial_state<C: NodeClient>(reconciler: &Reconciler<C>) {
    match reconciler.observe().await {
        Ok((state, condition)) => info!(
            "Node {} starts as {} (label {}={:?}, {} taint(s))",
            reconciler.node_name(),
            condition,
            IDLE_KEY,
            state.label(IDLE_KEY),
            state.taints.len()
        ),
        Err(e) => warn!("Cannot read node {}: {}", reconciler.node_name(), e),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let (config, layer) = args.thresholds.load(args.node.node_name.clone())?;
    let config = Arc::new(config);
    info!(
        "Starting node-idle-labeler v{} with {:?}",
        env!("CARGO_PKG_VERSION"),
        config
    );

    let sampler = start_telemetry(&config)?;
    let node_name = resolve_node_name(layer.node_name.as_deref())?;
    let client = kube_client().await?;

    let stats = if args.node.dry_run {
        info!("Dry-run mode: node metadata will not be modified");
        let mut reconciler = Reconciler::new(DryRunNodeClient::new(client), node_name);
        log_initial_state(&reconciler).await;
        controller::run_in_process(sampler, &mut reconciler, config, shutdown_signal()).await?
    } else {
        let mut reconciler = Reconciler::new(client, node_name);
        log_initial_state(&reconciler).await;
        controller::run_in_process(sampler, &mut reconciler, config, shutdown_signal()).await?
    };

    info!(
        "Stopped after {} tick(s), {} with failures",
        stats.ticks, stats.failed_ticks
    );
    Ok(())
}

async fn monitor(args: MonitorArgs) -> anyhow::Result<()> {
    let (config, _) = args.thresholds.load(None)?;
    let config = Arc::new(config);
    info!(
        "Monitoring local telemetry every {:?}",
        config.sample_interval
    );

    let sampler = start_telemetry(&config)?;
    let stats = controller::produce_lines(sampler, tokio::io::stdout(), shutdown_signal()).await?;

    info!(
        "Monitor stopped after {} sample(s), {} skipped",
        stats.ticks, stats.skipped
    );
    Ok(())
}

async fn label(args: LabelArgs) -> anyhow::Result<()> {
    let (config, layer) = args.thresholds.load(args.node.node_name.clone())?;
    let node_name = resolve_node_name(layer.node_name.as_deref())?;
    info!("Target node: {}", node_name);

    let client = kube_client().await?;
    let stdin = BufReader::new(tokio::io::stdin());

    let stats = if args.node.dry_run {
        info!("Dry-run mode: node metadata will not be modified");
        let mut reconciler = Reconciler::new(DryRunNodeClient::new(client), node_name);
        controller::consume_lines(stdin, &mut reconciler, &config, shutdown_signal()).await?
    } else {
        let mut reconciler = Reconciler::new(client, node_name);
        controller::consume_lines(stdin, &mut reconciler, &config, shutdown_signal()).await?
    };

    info!(
        "Labeler stopped after {} tick(s), {} with failures, {} line(s) skipped",
        stats.ticks, stats.failed_ticks, stats.skipped
    );
    Ok(())
}

async fn show_info(args: InfoArgs) -> anyhow::Result<()> {
    let file = match &args.config {
        Some(path) => ConfigLayer::load(path)?,
        None => ConfigLayer::default(),
    };
    let node_name = resolve_node_name(args.node_name.as_deref().or(file.node_name.as_deref()))?;
    let reconciler = Reconciler::new(kube_client().await?, node_name);

    let (state, condition) = reconciler.observe().await?;
    println!("Node: {}", reconciler.node_name());
    println!("Condition: {}", condition);
    println!(
        "Label {}: {}",
        IDLE_KEY,
        state.label(IDLE_KEY).unwrap_or("<unset>")
    );
    if state.taints.is_empty() {
        println!("Taints: <none>");
    } else {
        for taint in &state.taints {
            println!("Taint: {}", taint);
        }
    }
    Ok(())
}
