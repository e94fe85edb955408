//! Wires the pipeline together from an [`AppConfig`].

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Duration, Utc};
use std::sync::Arc;
use validator::Validate;

use crate::config::AppConfig;
use crate::dispatcher::NotificationDispatcher;
use crate::fetcher::HttpFetcher;
use crate::models::{Alert, NewAlert, NewProduct, PriceHistoryEntry, Product, ProductSnapshot};
use crate::monitor::PriceMonitor;
use crate::orchestrator::ScrapeOrchestrator;
use crate::plugins::ExtractorRegistry;
use crate::storage::{SqliteStorage, Storage};

pub struct App {
    pub config: AppConfig,
    pub storage: Arc<dyn Storage>,
    pub orchestrator: Arc<ScrapeOrchestrator>,
    pub monitor: Arc<PriceMonitor>,
}

impl App {
    /// Connect to the configured database and build every service.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let storage = SqliteStorage::connect(&config.database)
            .await
            .with_context(|| format!("failed to open database {}", config.database.url))?;
        Self::with_storage(config, Arc::new(storage))
    }

    pub fn with_storage(config: AppConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config.scraper).context("failed to build HTTP fetcher")?;
        let registry = ExtractorRegistry::with_builtin();
        tracing::debug!("Extractors: {}", registry.list_extractors().join(", "));

        let orchestrator = Arc::new(ScrapeOrchestrator::new(
            Arc::new(fetcher),
            Arc::new(registry),
            &config.scraper,
        ));

        let dispatcher = NotificationDispatcher::from_config(&config.notifications)
            .context("failed to configure notification channels")?;
        if dispatcher.available_channels().is_empty() {
            tracing::warn!("No notification channel is enabled, alerts will not be delivered");
        }

        let monitor = Arc::new(PriceMonitor::new(
            storage.clone(),
            orchestrator.clone(),
            dispatcher,
            &config.scheduler,
            &config.history,
        ));

        Ok(Self {
            config,
            storage,
            orchestrator,
            monitor,
        })
    }

    /// Scrape without touching storage.
    pub async fn scrape(&self, url: &str) -> Result<ProductSnapshot> {
        Ok(self.orchestrator.scrape(url).await?)
    }

    /// Start tracking a URL. The page is scraped once so the product starts
    /// with a known price and an initial history entry.
    pub async fn add_product(&self, new_product: NewProduct) -> Result<Product> {
        new_product.validate()?;
        let url = new_product.url.trim();

        if let Some(existing) = self.storage.get_product_by_url(url).await? {
            bail!("{} is already tracked as {}", url, existing.id);
        }

        let snapshot = self.orchestrator.scrape(url).await?;
        let mut product = Product::from_snapshot(&snapshot);
        if let Some(name) = new_product.name.filter(|n| !n.trim().is_empty()) {
            product.name = name;
        }

        self.storage.create_product(&product).await?;
        let entry = PriceHistoryEntry::new(&product.id, snapshot.price, snapshot.captured_at);
        self.storage.record_price_update(&product, Some(&entry)).await?;

        tracing::info!(product_id = %product.id, "Tracking {} at {} {}", product.url, product.current_price, product.currency);
        Ok(product)
    }

    pub async fn add_alert(&self, new_alert: NewAlert) -> Result<Alert> {
        new_alert.validate()?;

        if self.storage.get_product(&new_alert.product_id).await?.is_none() {
            return Err(anyhow!("product {} not found", new_alert.product_id));
        }

        let alert = Alert::new(new_alert);
        self.storage.create_alert(&alert).await?;
        tracing::info!(alert_id = %alert.id, "Alert created for product {} at {}", alert.product_id, alert.target_price);
        Ok(alert)
    }

    pub async fn history(&self, product_id: &str, days: Option<u32>) -> Result<Vec<PriceHistoryEntry>> {
        let since = days.map(|d| Utc::now() - Duration::days(i64::from(d)));
        Ok(self.storage.price_history(product_id, since).await?)
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.storage.list_products(0, 0).await?)
    }
}
