use anyhow::Result;
use clap::Parser;
use restic_exporter::{
    aggregator::{Aggregator, AggregatorOptions},
    client::{ResticClient, ResticConfig},
    config::Settings,
    metrics::ExporterMetrics,
    scheduler::Scheduler,
    server::{start_server, AppState},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Restic Exporter - Prometheus metrics exporter for restic repositories
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "RESTIC_EXPORTER_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let (settings, notices) = Settings::load(args.config.as_deref())?;

    // Initialize logging
    init_logging(&settings.log_level, &settings.log_format)?;
    for notice in &notices {
        warn!("{}", notice);
    }

    info!("Starting Restic Prometheus Exporter");
    info!("Repository: {}", settings.restic_repository);
    info!("It could take a while if the repository is remote");

    let client = ResticClient::new(ResticConfig::from_settings(&settings));
    let aggregator = Aggregator::new(
        Arc::new(client),
        AggregatorOptions::from_settings(&settings)?,
    );
    let metrics = Arc::new(ExporterMetrics::new()?);

    let scheduler = Scheduler::start(
        aggregator,
        metrics.clone(),
        settings.refresh_every(),
        settings.exit_on_error,
    )
    .await?;

    let listen_address = settings.socket_address();
    let state = AppState::new(metrics);

    tokio::select! {
        result = start_server(&listen_address, state) => result?,
        result = scheduler.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_lowercase()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}
