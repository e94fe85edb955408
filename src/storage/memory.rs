use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Storage, StorageResult};
use crate::models::{Alert, PriceHistoryEntry, Product};
use crate::utils::error::StorageError;

#[derive(Default)]
struct State {
    products: HashMap<String, Product>,
    history: Vec<PriceHistoryEntry>,
    alerts: HashMap<String, Alert>,
}

/// Process local store used by tests and `scrape`/dry-run commands.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts for a product regardless of their active flag.
    pub async fn alerts_for(&self, product_id: &str) -> Vec<Alert> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.product_id == product_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        alerts
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_product(&self, product: &Product) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.products.values().any(|p| p.url == product.url) {
            return Err(StorageError::Conflict(format!("product URL already tracked: {}", product.url)));
        }
        if state.products.contains_key(&product.id) {
            return Err(StorageError::Conflict(format!("duplicate product id: {}", product.id)));
        }
        state.products.insert(product.id.clone(), product.clone());
        Ok(())
    }

    async fn get_product(&self, id: &str) -> StorageResult<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(id).cloned())
    }

    async fn get_product_by_url(&self, url: &str) -> StorageResult<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.values().find(|p| p.url == url).cloned())
    }

    async fn list_products(&self, limit: usize, offset: usize) -> StorageResult<Vec<Product>> {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let page = products.into_iter().skip(offset);
        Ok(if limit == 0 { page.collect() } else { page.take(limit).collect() })
    }

    async fn update_product(&self, product: &Product) -> StorageResult<()> {
        let mut state = self.state.write().await;
        // Missing rows are a no-op, matching an UPDATE that touches nothing.
        if let Some(existing) = state.products.get_mut(&product.id) {
            *existing = product.clone();
        }
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        let removed = state.products.remove(id).is_some();
        if removed {
            state.history.retain(|h| h.product_id != id);
            state.alerts.retain(|_, a| a.product_id != id);
        }
        Ok(removed)
    }

    async fn append_price_history(
        &self,
        product_id: &str,
        price: Decimal,
        captured_at: DateTime<Utc>,
    ) -> StorageResult<PriceHistoryEntry> {
        let entry = PriceHistoryEntry::new(product_id, price, captured_at);
        let mut state = self.state.write().await;
        state.history.push(entry.clone());
        Ok(entry)
    }

    async fn price_history(
        &self,
        product_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<PriceHistoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<PriceHistoryEntry> = state
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .filter(|h| since.is_none_or(|since| h.captured_at >= since))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.captured_at.cmp(&b.captured_at));
        Ok(entries)
    }

    async fn latest_price_history(&self, product_id: &str) -> StorageResult<Option<PriceHistoryEntry>> {
        let state = self.state.read().await;
        Ok(state
            .history
            .iter()
            .filter(|h| h.product_id == product_id)
            .max_by(|a, b| a.captured_at.cmp(&b.captured_at))
            .cloned())
    }

    async fn record_price_update(
        &self,
        product: &Product,
        history: Option<&PriceHistoryEntry>,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        match state.products.get_mut(&product.id) {
            Some(existing) => *existing = product.clone(),
            None => return Ok(()),
        }
        if let Some(entry) = history {
            state.history.push(entry.clone());
        }
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.products.contains_key(&alert.product_id) {
            return Err(StorageError::Conflict(format!("unknown product: {}", alert.product_id)));
        }
        state.alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    async fn get_active_alerts(&self, product_id: &str) -> StorageResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.product_id == product_id && a.is_active)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(alerts)
    }

    async fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.alerts.get_mut(&alert.id) {
            *existing = alert.clone();
        }
        Ok(())
    }

    async fn delete_alert(&self, id: &str) -> StorageResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.alerts.remove(id).is_some())
    }
}
