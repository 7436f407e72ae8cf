//! ---
//! acct_section: "01-core-functionality"
//! acct_subsection: "binary"
//! acct_type: "source"
//! acct_scope: "code"
//! acct_description: "Binary entrypoint for the acct-gather node daemon."
//! acct_version: "v0.0.0-prealpha"
//! acct_owner: "tbd"
//! ---
mod http;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use acct_gather_common::config::AppConfig;
use acct_gather_common::logging::init_tracing;
use acct_gather_energy::{
    encode, BackendRegistry, EnergyContext, EnergyMetricsExporter, EnergySampler, ProfileTimer,
    ProtocolVersion,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

use crate::http::{spawn_http_server, HttpState, SharedRegistry};
use crate::metrics::{new_registry, DaemonMetrics};

const SERVICE_NAME: &str = "acct-gatherd";

#[derive(Debug, Parser)]
#[command(author, version, about = "Node energy accounting daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Override the configured energy backend")]
    backend: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Override the sampling frequency; 0 disables sampling"
    )]
    frequency: Option<u32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Bind the backend, run the sampler and serve readings")]
    Run,
    #[command(about = "Print the effective configuration and backend options")]
    ShowConfig,
    #[command(about = "List registered energy backends")]
    Backends,
    #[command(about = "Poll the backend once and print the encoded node sample")]
    Sample {
        #[arg(long, value_enum, default_value_t = CliProtocol::Current)]
        protocol: CliProtocol,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliProtocol {
    Legacy,
    Current,
}

impl From<CliProtocol> for ProtocolVersion {
    fn from(value: CliProtocol) -> Self {
        match value {
            CliProtocol::Legacy => ProtocolVersion::LEGACY,
            CliProtocol::Current => ProtocolVersion::CURRENT,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/acct-gather/acct-gatherd.toml"));
    candidates.push(PathBuf::from("configs/acct-gatherd.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let mut config = loaded.config;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    init_tracing(SERVICE_NAME, &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running on defaults"),
    }

    let registry = Arc::new(BackendRegistry::with_builtin());
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let metrics_registry = new_registry();
            let daemon_metrics = DaemonMetrics::new(&metrics_registry)?;
            daemon_metrics.observe_config_load(load_duration.as_secs_f64());
            daemon_metrics.inc_start();
            daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), &config.energy.backend);
            run_daemon(config, registry, metrics_registry).await?
        }
        Commands::ShowConfig => show_config(&config, registry)?,
        Commands::Backends => {
            for name in registry.names() {
                println!("{name}");
            }
        }
        Commands::Sample { protocol } => sample_once(&config, registry, protocol.into())?,
    }

    Ok(())
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(backend) = &cli.backend {
        config.energy.backend = backend.clone();
    }
    if let Some(frequency) = cli.frequency {
        config.energy.sample_frequency = frequency;
    }
}

async fn run_daemon(
    config: AppConfig,
    registry: Arc<BackendRegistry>,
    metrics_registry: SharedRegistry,
) -> Result<()> {
    let energy_metrics = EnergyMetricsExporter::register(&metrics_registry)
        .context("failed to register energy metrics")?;
    let context = Arc::new(
        EnergyContext::from_config(&config.energy, registry).with_metrics(energy_metrics),
    );
    context
        .init()
        .with_context(|| format!("unable to bind energy backend {}", config.energy.backend))?;

    let timer = Arc::new(ProfileTimer::from_config(&config.profile));
    let ticker = if timer.is_running() {
        Some(
            timer
                .spawn_ticker(config.profile.ticker_resolution)
                .context("failed to spawn profile ticker")?,
        )
    } else {
        info!("profiling disabled; energy sampler will not loop");
        None
    };

    let sampler = EnergySampler::new(Arc::clone(&context), Arc::clone(&timer));
    sampler.start(config.energy.sample_frequency)?;

    let http_server = if config.metrics.enabled {
        let state = HttpState {
            registry: metrics_registry,
            context: Arc::clone(&context),
        };
        Some(spawn_http_server(state, config.metrics.listen)?)
    } else {
        info!("http exporter disabled by configuration");
        None
    };

    info!(
        backend = context.backend_name(),
        frequency = config.energy.sample_frequency,
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = http_server {
        server.shutdown().await?;
    }

    sampler.stop();
    timer.stop();
    let joiner = tokio::task::spawn_blocking(move || {
        sampler.join();
        if let Some(ticker) = ticker {
            if ticker.join().is_err() {
                warn!("profile ticker panicked");
            }
        }
    });
    joiner.await.context("failed to join background threads")?;
    context.fini()?;
    info!("shutdown complete");
    Ok(())
}

fn show_config(config: &AppConfig, registry: Arc<BackendRegistry>) -> Result<()> {
    println!("{}", toml::to_string_pretty(config).context("failed to render configuration")?);
    let context = EnergyContext::from_config(&config.energy, registry);
    let options = context.conf_options()?;
    let effective = context.get_config()?;
    let report = json!({
        "backend": context.backend_name(),
        "declared_options": options.iter().collect::<Vec<_>>(),
        "effective": effective,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    context.fini()?;
    Ok(())
}

fn sample_once(
    config: &AppConfig,
    registry: Arc<BackendRegistry>,
    version: ProtocolVersion,
) -> Result<()> {
    let context = EnergyContext::from_config(&config.energy, registry);
    context.update_node_energy()?;
    let sample = context.node_sample()?;
    let encoded = encode(Some(&sample), version);
    let report = json!({
        "backend": context.backend_name(),
        "protocol": version.to_string(),
        "sample": sample,
        "encoded": hex::encode(&encoded),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    context.fini()?;
    Ok(())
}
