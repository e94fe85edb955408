use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::HistoryConfig;
use crate::models::{PriceHistoryEntry, Product, ProductSnapshot};
use crate::storage::Storage;
use crate::utils::error::StorageError;
use crate::utils::telemetry::PRICE_CHANGES_TOTAL;

/// What a commit did to one product.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceUpdate {
    /// Product as stored after the commit.
    pub product: Product,
    pub old_price: Decimal,
    /// The observed price differs from the stored one.
    pub price_changed: bool,
    /// Some product field was written.
    pub persisted: bool,
    pub history: Option<PriceHistoryEntry>,
}

/// Detects price deltas and writes them back together with their history row.
pub struct PriceComparator {
    storage: Arc<dyn Storage>,
    force_snapshot_interval: Option<Duration>,
}

impl PriceComparator {
    pub fn new(storage: Arc<dyn Storage>, config: &HistoryConfig) -> Self {
        Self {
            storage,
            force_snapshot_interval: config
                .force_snapshot_interval_secs
                .map(|secs| Duration::seconds(secs as i64)),
        }
    }

    /// Merge a snapshot into the stored product. `changed` is true only when
    /// the price differs; other fields may still be updated.
    pub fn apply(existing: &Product, snapshot: &ProductSnapshot) -> (Product, bool) {
        let changed = existing.current_price != snapshot.price;
        let mut updated = existing.clone();

        updated.current_price = snapshot.price;
        updated.currency = snapshot.currency.clone();
        updated.is_available = snapshot.is_available;

        // Name and image are only filled in, never overwritten by page text.
        if updated.name.trim().is_empty() {
            if let Some(name) = snapshot.name.as_ref().filter(|n| !n.trim().is_empty()) {
                updated.name = name.clone();
            }
        }
        if updated.image_url.is_none() {
            updated.image_url = snapshot.image_url.clone();
        }
        if updated.site.is_empty() {
            updated.site = snapshot.site.clone();
        }

        if updated != *existing {
            updated.updated_at = Utc::now().max(existing.updated_at);
        }

        (updated, changed)
    }

    /// Compare and persist. The product update and its history entry are
    /// written as one unit; nothing is written when nothing changed.
    ///
    /// Callers serialize commits per product and pass the freshly read row,
    /// so the snapshot always wins over `existing`.
    pub async fn commit(
        &self,
        existing: &Product,
        snapshot: &ProductSnapshot,
    ) -> Result<PriceUpdate, StorageError> {
        let (product, price_changed) = Self::apply(existing, snapshot);
        let dirty = product != *existing;

        let history = if price_changed || self.snapshot_due(&product.id, snapshot).await? {
            Some(PriceHistoryEntry::new(&product.id, snapshot.price, snapshot.captured_at))
        } else {
            None
        };

        if dirty || history.is_some() {
            self.storage.record_price_update(&product, history.as_ref()).await?;
        }

        if price_changed {
            metrics::counter!(PRICE_CHANGES_TOTAL).increment(1);
            tracing::info!(
                "Price updated for {}: {} -> {} {}",
                product.id,
                existing.current_price,
                product.current_price,
                product.currency
            );
        }

        Ok(PriceUpdate {
            old_price: existing.current_price,
            price_changed,
            persisted: dirty || history.is_some(),
            history,
            product,
        })
    }

    async fn snapshot_due(&self, product_id: &str, snapshot: &ProductSnapshot) -> Result<bool, StorageError> {
        let Some(interval) = self.force_snapshot_interval else {
            return Ok(false);
        };

        Ok(match self.storage.latest_price_history(product_id).await? {
            Some(latest) => snapshot.captured_at - latest.captured_at >= interval,
            None => true,
        })
    }
}
