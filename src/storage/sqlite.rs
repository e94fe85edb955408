use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::time::Duration;

use super::{Storage, StorageResult};
use crate::config::DatabaseConfig;
use crate::models::{join_channels, split_channels, Alert, PriceHistoryEntry, Product};
use crate::utils::error::StorageError;

#[derive(Debug, FromRow)]
struct ProductRow {
    id: String,
    url: String,
    name: String,
    image_url: Option<String>,
    current_price: String,
    currency: String,
    is_available: bool,
    site: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StorageError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            current_price: parse_decimal(&row.current_price)?,
            id: row.id,
            url: row.url,
            name: row.name,
            image_url: row.image_url,
            currency: row.currency,
            is_available: row.is_available,
            site: row.site,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: String,
    product_id: String,
    price: String,
    captured_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for PriceHistoryEntry {
    type Error = StorageError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(PriceHistoryEntry {
            price: parse_decimal(&row.price)?,
            id: row.id,
            product_id: row.product_id,
            captured_at: row.captured_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AlertRow {
    id: String,
    product_id: String,
    target_price: String,
    is_active: bool,
    channels: String,
    recipient: Option<String>,
    created_at: DateTime<Utc>,
    notified_at: Option<DateTime<Utc>>,
    pending_from: Option<String>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Alert {
            target_price: parse_decimal(&row.target_price)?,
            channels: split_channels(&row.channels).map_err(StorageError::Corrupt)?,
            pending_from: row.pending_from.as_deref().map(parse_decimal).transpose()?,
            id: row.id,
            product_id: row.product_id,
            is_active: row.is_active,
            recipient: row.recipient,
            created_at: row.created_at,
            notified_at: row.notified_at,
        })
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw).map_err(|e| StorageError::Corrupt(format!("bad decimal {:?}: {}", raw, e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

const PRODUCT_COLUMNS: &str =
    "id, url, name, image_url, current_price, currency, is_available, site, created_at, updated_at";

/// SQLite backed store. Prices are kept as decimal strings so no precision is
/// lost on the way through the database.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating when missing) the database and apply migrations.
    pub async fn connect(config: &DatabaseConfig) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .connect_with(options)
            .await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        tracing::info!("Connected to database at {}", config.url);
        Ok(storage)
    }

    /// Single connection in-memory database, used by tests.
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_product(&self, product: &Product) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO products
            (id, url, name, image_url, current_price, currency, is_available, site, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.id)
        .bind(&product.url)
        .bind(&product.name)
        .bind(&product.image_url)
        .bind(product.current_price.to_string())
        .bind(&product.currency)
        .bind(product.is_available)
        .bind(&product.site)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StorageError::Conflict(format!(
                "product URL already tracked: {}",
                product.url
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_product(&self, id: &str) -> StorageResult<Option<Product>> {
        let row: Option<ProductRow> =
            sqlx::query_as(&format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Product::try_from).transpose()
    }

    async fn get_product_by_url(&self, url: &str) -> StorageResult<Option<Product>> {
        let row: Option<ProductRow> =
            sqlx::query_as(&format!("SELECT {} FROM products WHERE url = ?", PRODUCT_COLUMNS))
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Product::try_from).transpose()
    }

    async fn list_products(&self, limit: usize, offset: usize) -> StorageResult<Vec<Product>> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = if limit == 0 { -1 } else { limit as i64 };

        let rows: Vec<ProductRow> = sqlx::query_as(&format!(
            "SELECT {} FROM products ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            PRODUCT_COLUMNS
        ))
        .bind(limit)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Product::try_from).collect()
    }

    async fn update_product(&self, product: &Product) -> StorageResult<()> {
        update_product_query(product).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_product(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_price_history(
        &self,
        product_id: &str,
        price: Decimal,
        captured_at: DateTime<Utc>,
    ) -> StorageResult<PriceHistoryEntry> {
        let entry = PriceHistoryEntry::new(product_id, price, captured_at);
        insert_history_query(&entry).execute(&self.pool).await?;
        Ok(entry)
    }

    async fn price_history(
        &self,
        product_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<PriceHistoryEntry>> {
        let rows: Vec<HistoryRow> = match since {
            Some(since) => {
                sqlx::query_as(
                    "SELECT id, product_id, price, captured_at FROM price_history \
                     WHERE product_id = ? AND captured_at >= ? ORDER BY captured_at ASC, rowid ASC",
                )
                .bind(product_id)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, product_id, price, captured_at FROM price_history \
                     WHERE product_id = ? ORDER BY captured_at ASC, rowid ASC",
                )
                .bind(product_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(PriceHistoryEntry::try_from).collect()
    }

    async fn latest_price_history(&self, product_id: &str) -> StorageResult<Option<PriceHistoryEntry>> {
        let row: Option<HistoryRow> = sqlx::query_as(
            "SELECT id, product_id, price, captured_at FROM price_history \
             WHERE product_id = ? ORDER BY captured_at DESC, rowid DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PriceHistoryEntry::try_from).transpose()
    }

    async fn record_price_update(
        &self,
        product: &Product,
        history: Option<&PriceHistoryEntry>,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = update_product_query(product).execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            // Deleted while the cycle was scraping it.
            tx.rollback().await?;
            return Ok(());
        }

        if let Some(entry) = history {
            insert_history_query(entry).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts
            (id, product_id, target_price, is_active, channels, recipient, created_at, notified_at, pending_from)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.product_id)
        .bind(alert.target_price.to_string())
        .bind(alert.is_active)
        .bind(join_channels(&alert.channels))
        .bind(&alert.recipient)
        .bind(alert.created_at)
        .bind(alert.notified_at)
        .bind(alert.pending_from.map(|p| p.to_string()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => Err(
                StorageError::Conflict(format!("unknown product: {}", alert.product_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_active_alerts(&self, product_id: &str) -> StorageResult<Vec<Alert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(
            r#"
            SELECT id, product_id, target_price, is_active, channels, recipient, created_at, notified_at,
                   pending_from
            FROM alerts
            WHERE product_id = ? AND is_active = 1
            ORDER BY created_at ASC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn update_alert(&self, alert: &Alert) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET target_price = ?, is_active = ?, channels = ?, recipient = ?, notified_at = ?, pending_from = ?
            WHERE id = ?
            "#,
        )
        .bind(alert.target_price.to_string())
        .bind(alert.is_active)
        .bind(join_channels(&alert.channels))
        .bind(&alert.recipient)
        .bind(alert.notified_at)
        .bind(alert.pending_from.map(|p| p.to_string()))
        .bind(&alert.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_alert(&self, id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn update_product_query(
    product: &Product,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        r#"
        UPDATE products
        SET name = ?, image_url = ?, current_price = ?, currency = ?, is_available = ?, site = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&product.name)
    .bind(&product.image_url)
    .bind(product.current_price.to_string())
    .bind(&product.currency)
    .bind(product.is_available)
    .bind(&product.site)
    .bind(product.updated_at)
    .bind(&product.id)
}

fn insert_history_query(
    entry: &PriceHistoryEntry,
) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query("INSERT INTO price_history (id, product_id, price, captured_at) VALUES (?, ?, ?, ?)")
        .bind(&entry.id)
        .bind(&entry.product_id)
        .bind(entry.price.to_string())
        .bind(entry.captured_at)
}
