use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use price_watcher::models::{ChannelKind, NewAlert, NewProduct};
use price_watcher::scheduler::MonitorScheduler;
use price_watcher::storage::MemoryStorage;
use price_watcher::utils::telemetry::{init_tracing, install_metrics};
use price_watcher::{App, AppConfig, TriggerSource};

#[derive(Parser)]
#[command(name = "price-watcher", version)]
#[command(about = "Track product prices and get alerted when they drop")]
struct Cli {
    /// Extra configuration file layered over config/default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor on its configured interval until interrupted
    Run,

    /// Run a single monitoring cycle and print the report
    Check,

    /// Scrape a page and print what was extracted, without storing anything
    Scrape { url: String },

    /// Start tracking a product page
    AddProduct {
        url: String,

        /// Label to use instead of the page title
        #[arg(long)]
        name: Option<String>,
    },

    /// Alert when a product drops to or below a target price
    AddAlert {
        product_id: String,
        target: Decimal,

        /// Delivery channel, repeatable (email, telegram, discord)
        #[arg(long = "channel", default_value = "email")]
        channels: Vec<ChannelKind>,

        /// Email address or Telegram chat id overriding the channel default
        #[arg(long)]
        recipient: Option<String>,
    },

    /// Show recorded prices for a product
    History {
        product_id: String,

        /// Only entries from the last N days
        #[arg(long)]
        days: Option<u32>,
    },

    /// List tracked products
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Check => check(config).await,
        Commands::Scrape { url } => {
            let app = App::with_storage(config, Arc::new(MemoryStorage::new()))?;
            let snapshot = app.scrape(&url).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        Commands::AddProduct { url, name } => {
            let app = App::new(config).await?;
            let product = app.add_product(NewProduct { url, name }).await?;
            println!(
                "{}  {}  {} {}",
                product.id,
                product.display_name(),
                product.current_price,
                product.currency
            );
            Ok(())
        }
        Commands::AddAlert {
            product_id,
            target,
            channels,
            recipient,
        } => {
            let app = App::new(config).await?;
            let alert = app
                .add_alert(NewAlert {
                    product_id,
                    target_price: target,
                    channels,
                    recipient,
                })
                .await?;
            println!("{}", alert.id);
            Ok(())
        }
        Commands::History { product_id, days } => {
            let app = App::new(config).await?;
            for entry in app.history(&product_id, days).await? {
                println!("{}  {}", entry.captured_at.to_rfc3339(), entry.price);
            }
            Ok(())
        }
        Commands::List => {
            let app = App::new(config).await?;
            for product in app.list_products().await? {
                println!(
                    "{}  {} {}  {}  {}",
                    product.id,
                    product.current_price,
                    product.currency,
                    if product.is_available { "available" } else { "unavailable" },
                    product.display_name()
                );
            }
            Ok(())
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    install_metrics(&config.metrics)?;

    info!("Starting price watcher...");
    let app = App::new(config).await?;

    let mut scheduler = MonitorScheduler::new(app.monitor.clone(), &app.config.scheduler).await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    scheduler.shutdown().await?;

    Ok(())
}

async fn check(config: AppConfig) -> Result<()> {
    let app = App::new(config).await?;

    let shutdown = CancellationToken::new();
    let on_interrupt = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let report = app.monitor.run_cycle(TriggerSource::Manual, &shutdown).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
