use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Fields an extractor managed to pull out of a page. Everything is optional
/// here; the orchestrator fills defaults and rejects pages without a price.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageExtract {
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub is_available: Option<bool>,
    pub image_url: Option<String>,
}

impl PageExtract {
    /// Fill missing fields from a lower priority extraction.
    pub fn or(self, other: PageExtract) -> PageExtract {
        PageExtract {
            name: self.name.or(other.name),
            price: self.price.or(other.price),
            currency: self.currency.or(other.currency),
            is_available: self.is_available.or(other.is_available),
            image_url: self.image_url.or(other.image_url),
        }
    }
}

/// Result of one successful scrape. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub url: String,
    pub site: String,
    pub name: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub is_available: bool,
    pub image_url: Option<String>,
    /// Name of the extraction strategy that produced this snapshot.
    pub extractor: String,
    pub captured_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_extract_merge_prefers_self() {
        let primary = PageExtract {
            name: Some("JSON-LD name".to_string()),
            price: None,
            currency: Some("USD".to_string()),
            is_available: None,
            image_url: None,
        };
        let fallback = PageExtract {
            name: Some("Title tag".to_string()),
            price: Some(Decimal::from(10)),
            currency: Some("EUR".to_string()),
            is_available: Some(false),
            image_url: Some("https://cdn.example.com/a.png".to_string()),
        };

        let merged = primary.or(fallback);
        assert_eq!(merged.name.as_deref(), Some("JSON-LD name"));
        assert_eq!(merged.price, Some(Decimal::from(10)));
        assert_eq!(merged.currency.as_deref(), Some("USD"));
        assert_eq!(merged.is_available, Some(false));
        assert!(merged.image_url.is_some());
    }
}
