use rust_decimal::Decimal;
use scraper::{Html, Selector};
use serde_json::Value;
use std::str::FromStr;
use std::sync::LazyLock;
use url::Url;

use super::price_parser::{normalize_currency_code, resolve_currency};
use super::{
    absolute_url, availability_from_schema, first_attr, first_text, meta_content, parse_document,
    parse_structured_price,
};
use crate::models::PageExtract;
use crate::plugins::traits::PriceExtractor;
use crate::utils::error::ExtractionError;

static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid selector"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static PRICE_CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[itemprop="price"][content]"#).expect("valid selector"));
static PRICE_TEXT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[itemprop="price"], .product-price, .price, #price, .sale-price"#)
        .expect("valid selector")
});

const MAX_JSON_LD_DEPTH: usize = 6;

/// Fallback strategy for any site without a dedicated extractor. Reads
/// schema.org JSON-LD, then Open Graph / product meta tags, then common price
/// markup. Always yields at least the page title as the name.
#[derive(Debug, Default)]
pub struct GenericExtractor;

impl GenericExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PriceExtractor for GenericExtractor {
    fn name(&self) -> &str {
        "generic"
    }

    fn matches(&self, _host: &str) -> bool {
        true
    }

    fn extract(&self, html: &str, url: &Url) -> Result<PageExtract, ExtractionError> {
        let doc = parse_document(html)?;
        Ok(structured_data(&doc, url).or(markup(&doc, url)))
    }
}

/// JSON-LD product data merged over meta tags. Site extractors fall back to
/// this when their own selectors come up empty.
pub(crate) fn structured_data(doc: &Html, url: &Url) -> PageExtract {
    json_ld(doc, url).or(meta_tags(doc, url))
}

fn json_ld(doc: &Html, url: &Url) -> PageExtract {
    for script in doc.select(&JSON_LD) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
            continue;
        };
        if let Some(product) = find_product(&value, 0) {
            return product_extract(product, url);
        }
    }
    PageExtract::default()
}

fn is_product_type(value: &Value) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == "Product",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("Product")),
        _ => false,
    }
}

fn find_product(value: &Value, depth: usize) -> Option<&Value> {
    if depth > MAX_JSON_LD_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => items.iter().find_map(|item| find_product(item, depth + 1)),
        Value::Object(map) => {
            if is_product_type(value) {
                return Some(value);
            }
            map.get("@graph")
                .or_else(|| map.get("mainEntity"))
                .and_then(|inner| find_product(inner, depth + 1))
        }
        _ => None,
    }
}

fn json_price(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_structured_price(s),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok().map(|d| d.normalize()),
        _ => None,
    }
}

fn json_image(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.iter().find_map(json_image),
        Value::Object(map) => map.get("url").and_then(Value::as_str),
        _ => None,
    }
}

fn product_extract(product: &Value, url: &Url) -> PageExtract {
    let offer = match product.get("offers") {
        Some(Value::Array(offers)) => offers.first(),
        Some(offer @ Value::Object(_)) => Some(offer),
        _ => None,
    };

    let price = offer.and_then(|o| {
        o.get("price")
            .or_else(|| o.get("lowPrice"))
            .and_then(json_price)
            .or_else(|| o.get("priceSpecification").and_then(|s| s.get("price")).and_then(json_price))
    });

    PageExtract {
        name: product
            .get("name")
            .and_then(Value::as_str)
            .map(super::collapse_whitespace)
            .filter(|n| !n.is_empty()),
        price,
        currency: offer
            .and_then(|o| o.get("priceCurrency"))
            .and_then(Value::as_str)
            .and_then(normalize_currency_code),
        is_available: offer
            .and_then(|o| o.get("availability"))
            .and_then(Value::as_str)
            .and_then(availability_from_schema),
        image_url: product
            .get("image")
            .and_then(json_image)
            .and_then(|raw| absolute_url(url, raw)),
    }
}

fn first_meta(doc: &Html, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| meta_content(doc, key))
}

fn meta_tags(doc: &Html, url: &Url) -> PageExtract {
    PageExtract {
        name: first_meta(doc, &["og:title", "twitter:title"]),
        price: first_meta(doc, &["product:price:amount", "og:price:amount"])
            .and_then(|raw| parse_structured_price(&raw)),
        currency: first_meta(doc, &["product:price:currency", "og:price:currency", "priceCurrency"])
            .and_then(|raw| normalize_currency_code(&raw)),
        is_available: first_meta(doc, &["product:availability", "og:availability", "availability"])
            .and_then(|raw| availability_from_schema(&raw)),
        image_url: first_meta(doc, &["og:image", "twitter:image"]).and_then(|raw| absolute_url(url, &raw)),
    }
}

fn markup(doc: &Html, url: &Url) -> PageExtract {
    let host = url.host_str().unwrap_or_default();

    let (price, currency) = match first_attr(doc, &PRICE_CONTENT, "content") {
        Some(content) => (parse_structured_price(&content), None),
        None => match first_text(doc, &PRICE_TEXT) {
            Some(text) => (super::price_parser::parse_price(&text), resolve_currency(&text, host)),
            None => (None, None),
        },
    };

    PageExtract {
        name: first_text(doc, &TITLE).or_else(|| first_text(doc, &HEADING)),
        price,
        currency,
        is_available: None,
        image_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://shop.example.com/p/123").unwrap()
    }

    #[test]
    fn test_json_ld_product() {
        let html = r#"
            <html><head><title>Store | Kettle</title>
            <script type="application/ld+json">
            {"@context":"https://schema.org","@graph":[
                {"@type":"WebSite","name":"Store"},
                {"@type":"Product","name":"Electric Kettle","image":["/img/kettle.jpg"],
                 "offers":{"@type":"Offer","price":"89.90","priceCurrency":"usd",
                           "availability":"https://schema.org/OutOfStock"}}
            ]}
            </script></head><body></body></html>"#;

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.name.as_deref(), Some("Electric Kettle"));
        assert_eq!(extract.price, Some(Decimal::from_str("89.9").unwrap()));
        assert_eq!(extract.currency.as_deref(), Some("USD"));
        assert_eq!(extract.is_available, Some(false));
        assert_eq!(extract.image_url.as_deref(), Some("https://shop.example.com/img/kettle.jpg"));
    }

    #[test]
    fn test_json_ld_numeric_price_and_offer_array() {
        let html = r#"<script type="application/ld+json">
            [{"@type":["Product","Thing"],"name":"Mouse",
              "offers":[{"price":49.5,"priceCurrency":"EUR"},{"price":60}]}]
            </script>"#;

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.price, Some(Decimal::from_str("49.5").unwrap()));
        assert_eq!(extract.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_meta_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="Cadeira Gamer">
            <meta property="product:price:amount" content="1299.90">
            <meta property="product:price:currency" content="BRL">
            <meta property="og:image" content="https://cdn.example.com/c.png">
            </head></html>"#;

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.name.as_deref(), Some("Cadeira Gamer"));
        assert_eq!(extract.price, Some(Decimal::from_str("1299.9").unwrap()));
        assert_eq!(extract.currency.as_deref(), Some("BRL"));
        assert_eq!(extract.image_url.as_deref(), Some("https://cdn.example.com/c.png"));
    }

    #[test]
    fn test_markup_fallback() {
        let html = r#"<html><head><title>Blue Mug</title></head>
            <body><h1>Mug</h1><span class="price">€ 12,50</span></body></html>"#;

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.name.as_deref(), Some("Blue Mug"));
        assert_eq!(extract.price, Some(Decimal::from_str("12.5").unwrap()));
        assert_eq!(extract.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn test_title_only_page() {
        let html = "<html><head><title>Just a page</title></head><body>hello</body></html>";

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.name.as_deref(), Some("Just a page"));
        assert!(extract.price.is_none());
    }

    #[test]
    fn test_broken_json_ld_is_ignored() {
        let html = r#"<title>T</title><script type="application/ld+json">{not json</script>
            <meta itemprop="price" content="10.00">"#;

        let extract = GenericExtractor::new().extract(html, &url()).unwrap();
        assert_eq!(extract.price, Some(Decimal::from(10)));
    }
}
