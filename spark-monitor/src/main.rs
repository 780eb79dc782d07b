mod config;

use clap::{Args, Parser};
use config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "spark-monitor", about = "Reverse proxy for the BERDL Spark monitor")]
enum CliCommand {
    /// Run the Spark monitor proxy
    Proxy(ProxyArgs),
}

#[derive(Args)]
struct ProxyArgs {
    /// YAML config file. The environment is read when omitted.
    #[arg(long)]
    config_file_path: Option<PathBuf>,
}

fn main() {
    let cli = CliCommand::parse();

    match cli {
        CliCommand::Proxy(args) => {
            let config = match load_config(&args) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    process::exit(1);
                }
            };

            let _sentry = init_logging(config.common.logging.as_ref());
            if let Some(metrics) = &config.common.metrics
                && let Err(e) = init_statsd(metrics)
            {
                tracing::error!(error = %e, "failed to set up statsd metrics");
                process::exit(1);
            }

            tracing::info!("Starting spark monitor proxy");
            if let Err(e) = run_proxy(config.proxy) {
                tracing::error!(error = %e, "spark monitor proxy failed");
                process::exit(1);
            }
        }
    }
}

fn load_config(args: &ProxyArgs) -> Result<Config, config::ConfigError> {
    match &args.config_file_path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(|name| std::env::var(name).ok()),
    }
}

/// Installs the fmt subscriber, plus the Sentry layer when a DSN is configured.
/// The returned guard flushes Sentry events on drop.
fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let dsn = logging.and_then(|logging| match logging.sentry_dsn.parse::<sentry::types::Dsn>() {
        Ok(dsn) => Some(dsn),
        Err(e) => {
            eprintln!("ignoring invalid sentry DSN: {e}");
            None
        }
    });
    let guard = dsn.map(|dsn| {
        sentry::init(sentry::ClientOptions {
            dsn: Some(dsn),
            release: sentry::release_name!(),
            ..Default::default()
        })
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_statsd(config: &MetricsConfig) -> Result<(), String> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("spark_monitor"))
        .map_err(|e| e.to_string())?;
    metrics::set_global_recorder(recorder).map_err(|e| e.to_string())?;
    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}

fn run_proxy(config: spark_proxy::config::Config) -> Result<(), spark_proxy::errors::ProxyError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(spark_proxy::run(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
    }))
}
