//! perfscope runner
//!
//! Runs bottleneck detection against a synthetic metric source and prints the
//! report as JSON.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use perfscope::config::DetectionConfig;
use perfscope::logging::{init_logging, LogConfig};
use perfscope::performance::{DetectionCoordinator, SyntheticMetricSource, SyntheticProfile};

#[derive(Parser)]
#[command(name = "perfscope")]
#[command(about = "Detect performance bottlenecks across extension execution contexts")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "PERFSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// How long to monitor before reporting
    #[arg(short, long, default_value = "10")]
    duration_secs: u64,

    /// Override the tick interval from the configuration
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Synthetic workload to monitor
    #[arg(short, long, value_enum, default_value = "leaking")]
    profile: ProfileArg,

    /// Log filter (e.g. info, debug, perfscope=trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Print Prometheus metrics to stderr after the report
    #[cfg(feature = "prometheus")]
    #[arg(long)]
    metrics: bool,
}

#[derive(ValueEnum, Clone, Copy)]
enum ProfileArg {
    Healthy,
    Leaking,
    Degraded,
}

impl From<ProfileArg> for SyntheticProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Healthy => SyntheticProfile::Healthy,
            ProfileArg::Leaking => SyntheticProfile::Leaking,
            ProfileArg::Degraded => SyntheticProfile::Degraded,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = init_logging(&LogConfig::default().with_level(cli.log_level.clone()))
        .context("failed to initialize logging")?;

    let mut config = DetectionConfig::load(cli.config.as_deref())
        .with_context(|| match &cli.config {
            Some(path) => format!("failed to load configuration from {}", path.display()),
            None => "failed to load configuration".to_string(),
        })?;
    if let Some(interval_ms) = cli.interval_ms {
        config.tick_interval_ms = interval_ms;
        config.validate().context("invalid --interval-ms")?;
    }

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let profile = SyntheticProfile::from(cli.profile);
    let source = Arc::new(SyntheticMetricSource::new(profile));

    let builder = DetectionCoordinator::builder(config).source(source);
    #[cfg(feature = "prometheus")]
    let metrics = Arc::new(perfscope::performance::DetectionMetrics::new()?);
    #[cfg(feature = "prometheus")]
    let builder = builder.metrics(Arc::clone(&metrics));
    let coordinator = builder.build()?;

    info!(profile = %profile, duration_secs = cli.duration_secs, "Monitoring synthetic workload");
    coordinator.start().await;

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(cli.duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping early"),
    }

    let result = coordinator.stop().await;
    println!("{}", result.to_json(cli.pretty)?);
    if !result.is_healthy() {
        warn!(
            total = result.total_bottlenecks,
            critical = result.critical_bottlenecks,
            score = result.overall_score,
            "Bottlenecks detected"
        );
    }

    #[cfg(feature = "prometheus")]
    if cli.metrics {
        eprintln!("{}", metrics.export_text()?);
    }

    Ok(())
}
