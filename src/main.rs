//! cache-sentinel - alerting and log shipping for a tiered cache deployment

use anyhow::{Context, Result};
use cache_sentinel::alert::AlertKind;
use cache_sentinel::config::{SentinelConfig, DEFAULT_CONFIG_HCL};
use cache_sentinel::dlq;
use cache_sentinel::{
    AlertEngine, ConsoleSink, ElasticsearchConnector, Emitter, EventBus, LogShipper,
    MemoryDlqHandler, NatsProvider, SentinelError,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Dead-lettered entries echoed when a consumer stops
const DLQ_SUMMARY_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "cache-sentinel")]
#[command(version)]
#[command(about = "Alerting and log shipping for tiered cache deployments")]
struct Cli {
    /// Configuration file path (.hcl)
    #[arg(short, long, env = "CACHE_SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Diagnostic log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the alerting engine and heartbeat monitor
    Alert {
        /// Print alerts without color
        #[arg(long)]
        no_color: bool,
    },

    /// Run the log shipper
    Ship,

    /// Run an emission client that registers, heartbeats and departs on Ctrl-C
    Emit {
        #[arg(long, default_value = "Writer_Service")]
        node_id: String,

        #[arg(long, default_value = "CacheWriterService")]
        service: String,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let json = matches!(cli.log_format, LogFormat::Json);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cache_sentinel={}", log_level).into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    let config = SentinelConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Alert { no_color } => run_alert(config, no_color).await,
        Commands::Ship => run_ship(config).await,
        Commands::Emit { node_id, service } => run_emit(config, node_id, service).await,
        Commands::Config { default } => {
            if default {
                print!("{}", DEFAULT_CONFIG_HCL);
            } else {
                println!("{:#?}", config);
            }
            Ok(())
        }
    }
}

async fn connect_bus(config: &SentinelConfig) -> Result<Arc<EventBus>> {
    let provider = NatsProvider::connect(config.nats_config())
        .await
        .with_context(|| format!("Failed to connect to broker at {}", config.broker.url))?;
    Ok(Arc::new(EventBus::new(provider)))
}

fn print_banner(config: &SentinelConfig) {
    println!("{}", "Starting alert monitoring...".bold());
    println!("Monitoring for:");
    for kind in AlertKind::all() {
        println!("  - {}", kind.label().color(kind.color()));
    }
    println!(
        "Heartbeat threshold: {}s, scan interval: {}s",
        config.alerting.heartbeat_threshold.as_secs(),
        config.alerting.scan_interval.as_secs()
    );
    println!();
}

async fn run_alert(config: SentinelConfig, no_color: bool) -> Result<()> {
    print_banner(&config);

    let bus = connect_bus(&config).await?;
    let sink = if no_color {
        ConsoleSink::plain()
    } else {
        ConsoleSink::new()
    };

    let dead_letters = Arc::new(MemoryDlqHandler::default());
    let handle = AlertEngine::new(bus, Arc::new(sink), config.engine_config())
        .with_dlq(dead_letters.clone())
        .start()
        .await
        .context("Failed to start alerting engine")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down alert monitoring");
    handle.shutdown().await;
    dlq::log_summary(dead_letters.as_ref(), DLQ_SUMMARY_LIMIT).await?;
    Ok(())
}

async fn run_ship(config: SentinelConfig) -> Result<()> {
    let bus = connect_bus(&config).await?;
    let connector = ElasticsearchConnector::new(
        config.shipper.store_url.clone(),
        config.shipper.request_timeout,
    );
    let dead_letters = Arc::new(MemoryDlqHandler::default());
    let shipper = LogShipper::new(bus, Arc::new(connector), config.shipper_config())
        .with_dlq(dead_letters.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut task = tokio::spawn(shipper.run(stop_rx));

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down log shipper");
            let _ = stop_tx.send(true);
            match tokio::time::timeout(config.shutdown_grace, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    anyhow::bail!("Log shipper did not stop within {:?}", config.shutdown_grace);
                }
            }
        }
    };

    dlq::log_summary(dead_letters.as_ref(), DLQ_SUMMARY_LIMIT).await?;
    match joined.context("Log shipper task panicked")? {
        Ok(_) => Ok(()),
        Err(e @ SentinelError::StoreUnavailable { .. }) => {
            Err(anyhow::Error::new(e).context("Index store unavailable, giving up"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_emit(config: SentinelConfig, node_id: String, service: String) -> Result<()> {
    let bus = connect_bus(&config).await?;
    let emitter = Arc::new(Emitter::new(bus, node_id, service, config.emitter_config()));

    if !emitter.register().await {
        tracing::warn!(node_id = %emitter.node_id(), "Registration was not delivered");
    }
    let heartbeat = emitter.spawn_heartbeat();
    tracing::info!(node_id = %emitter.node_id(), "Emitting heartbeats, Ctrl-C to depart");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    emitter.shutdown(Some(heartbeat)).await;
    Ok(())
}
