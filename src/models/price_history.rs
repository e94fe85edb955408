use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::generate_id;

/// One append-only row of a product's price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceHistoryEntry {
    pub id: String,
    pub product_id: String,
    pub price: Decimal,
    pub captured_at: DateTime<Utc>,
}

impl PriceHistoryEntry {
    pub fn new(product_id: &str, price: Decimal, captured_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_id(),
            product_id: product_id.to_string(),
            price,
            captured_at,
        }
    }
}
