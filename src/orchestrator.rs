//! `scrape(url) -> ProductSnapshot`: host based strategy selection, a bounded
//! pool of concurrent fetches and the defaults applied to every snapshot.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ScraperConfig;
use crate::fetcher::Fetcher;
use crate::models::ProductSnapshot;
use crate::plugins::registry::normalize_host;
use crate::plugins::ExtractorRegistry;
use crate::utils::error::{ExtractionError, ScrapeError};
use crate::utils::telemetry::SCRAPES_TOTAL;

pub type ScrapeResult = Result<ProductSnapshot, ScrapeError>;

pub struct ScrapeOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    registry: Arc<ExtractorRegistry>,
    // Shared by every caller, so overlapping cycles still respect the pool size.
    permits: Arc<Semaphore>,
    workers: usize,
    default_currency: String,
}

impl ScrapeOrchestrator {
    pub fn new(fetcher: Arc<dyn Fetcher>, registry: Arc<ExtractorRegistry>, config: &ScraperConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            fetcher,
            registry,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            default_currency: config.default_currency.clone(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Fetch and extract one product page.
    pub async fn scrape(&self, raw_url: &str) -> ScrapeResult {
        let url = parse_product_url(raw_url)?;
        let host = url.host_str().map(normalize_host).unwrap_or_default();
        let extractor = self.registry.resolve(&host);

        self.fetcher.wait_turn(&url).await;
        let raw = {
            let _permit = self.permits.acquire().await.map_err(|_| ScrapeError::Cancelled)?;
            self.fetcher.fetch(&url).await?
        };

        let extract = extractor.extract(&raw.body, &raw.final_url)?;
        let price = extract.price.ok_or_else(|| ExtractionError::PriceNotFound {
            extractor: extractor.name().to_string(),
        })?;

        Ok(ProductSnapshot {
            url: raw_url.trim().to_string(),
            site: host,
            name: extract.name,
            price,
            currency: extract.currency.unwrap_or_else(|| self.default_currency.clone()),
            is_available: extract.is_available.unwrap_or(true),
            image_url: extract.image_url,
            extractor: extractor.name().to_string(),
            captured_at: Utc::now(),
        })
    }

    /// As [`scrape`](Self::scrape), abandoning the fetch when `cancel` fires.
    pub async fn scrape_with_cancel(&self, raw_url: &str, cancel: &CancellationToken) -> ScrapeResult {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
            result = self.scrape(raw_url) => result,
        };
        record_outcome(&result);
        result
    }

    /// Scrape every URL with at most `workers` requests in flight. Each URL is
    /// independent; one failure never aborts the rest.
    pub async fn scrape_all(&self, urls: &[String]) -> HashMap<String, ScrapeResult> {
        stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.scrape(&url).await;
                record_outcome(&result);
                if let Err(e) = &result {
                    tracing::warn!("Scrape failed for {}: {}", url, e);
                }
                (url, result)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await
    }
}

fn parse_product_url(raw: &str) -> Result<Url, ScrapeError> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).map_err(|_| ScrapeError::InvalidUrl(trimmed.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ScrapeError::InvalidUrl(trimmed.to_string()));
    }
    Ok(url)
}

fn record_outcome(result: &ScrapeResult) {
    let outcome = match result {
        Ok(_) => "success",
        Err(ScrapeError::Cancelled) => "cancelled",
        Err(_) => "failure",
    };
    metrics::counter!(SCRAPES_TOTAL, "outcome" => outcome).increment(1);
}
