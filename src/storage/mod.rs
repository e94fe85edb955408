pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{Alert, PriceHistoryEntry, Product};
use crate::utils::error::StorageError;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistence contract consumed by the monitoring pipeline.
///
/// Absence is reported as `None` or an empty list, never as an error.
#[async_trait]
pub trait Storage: Send + Sync {
    // Product operations
    async fn create_product(&self, product: &Product) -> StorageResult<()>;
    async fn get_product(&self, id: &str) -> StorageResult<Option<Product>>;
    async fn get_product_by_url(&self, url: &str) -> StorageResult<Option<Product>>;
    /// Products ordered by creation time. A `limit` of zero means no limit.
    async fn list_products(&self, limit: usize, offset: usize) -> StorageResult<Vec<Product>>;
    async fn update_product(&self, product: &Product) -> StorageResult<()>;
    /// Deletes the product together with its history and alerts.
    async fn delete_product(&self, id: &str) -> StorageResult<bool>;

    // Price history operations
    async fn append_price_history(
        &self,
        product_id: &str,
        price: Decimal,
        captured_at: DateTime<Utc>,
    ) -> StorageResult<PriceHistoryEntry>;
    /// Entries captured at or after `since`, oldest first.
    async fn price_history(
        &self,
        product_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<PriceHistoryEntry>>;
    async fn latest_price_history(&self, product_id: &str) -> StorageResult<Option<PriceHistoryEntry>>;

    /// Persist a product update and its optional history entry as one unit.
    async fn record_price_update(
        &self,
        product: &Product,
        history: Option<&PriceHistoryEntry>,
    ) -> StorageResult<()>;

    // Alert operations
    async fn create_alert(&self, alert: &Alert) -> StorageResult<()>;
    async fn get_active_alerts(&self, product_id: &str) -> StorageResult<Vec<Alert>>;
    async fn update_alert(&self, alert: &Alert) -> StorageResult<()>;
    async fn delete_alert(&self, id: &str) -> StorageResult<bool>;
}
