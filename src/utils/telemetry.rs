//! Tracing subscriber setup and the metric names emitted by the pipeline.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LoggingConfig, MetricsConfig};

pub const CYCLES_TOTAL: &str = "pricewatcher_cycles_total";
pub const CYCLE_DURATION_SECONDS: &str = "pricewatcher_cycle_duration_seconds";
pub const SCRAPES_TOTAL: &str = "pricewatcher_scrapes_total";
pub const PRICE_CHANGES_TOTAL: &str = "pricewatcher_price_changes_total";
pub const ALERTS_FIRED_TOTAL: &str = "pricewatcher_alerts_fired_total";
pub const NOTIFICATIONS_TOTAL: &str = "pricewatcher_notifications_total";

/// Install the global subscriber. The returned guard must be kept alive for
/// the file writer to flush.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("invalid logging level directive")?;

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "price-watcher.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .context("failed to install tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .try_init()
                .context("failed to install tracing subscriber")?;
            Ok(None)
        }
    }
}

/// Start the Prometheus scrape endpoint when metrics are enabled.
pub fn install_metrics(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid metrics listen address {}", config.listen))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    tracing::info!("Metrics exporter listening on {}", addr);
    Ok(())
}
