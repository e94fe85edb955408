use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{generate_id, ProductSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    pub url: String,
    pub name: String,
    pub image_url: Option<String>,

    // Latest successful scrape
    pub current_price: Decimal,
    pub currency: String,
    pub is_available: bool,

    /// Host the product is tracked on, e.g. `www.amazon.com.br`.
    pub site: String,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(url(message = "product URL must be an absolute http(s) URL"))]
    pub url: String,
    #[validate(length(max = 512))]
    pub name: Option<String>,
}

impl Product {
    /// Build a product from the first scrape of its page.
    pub fn from_snapshot(snapshot: &ProductSnapshot) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            url: snapshot.url.clone(),
            name: snapshot.name.clone().unwrap_or_default(),
            image_url: snapshot.image_url.clone(),
            current_price: snapshot.price,
            currency: snapshot.currency.clone(),
            is_available: snapshot.is_available,
            site: snapshot.site.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the tracked URL can be fetched at all. Products with a blank or
    /// non-http URL are skipped by the monitoring cycle.
    pub fn has_fetchable_url(&self) -> bool {
        match url::Url::parse(self.url.trim()) {
            Ok(parsed) => matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some(),
            Err(_) => false,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}
