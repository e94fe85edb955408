use scraper::Selector;
use std::sync::LazyLock;
use url::Url;

use super::generic::structured_data;
use super::price_parser::{parse_price, resolve_currency};
use super::{absolute_url, first_attr, first_text, parse_document};
use crate::models::PageExtract;
use crate::plugins::traits::PriceExtractor;
use crate::utils::error::ExtractionError;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("#productTitle, #title"));

/// Ordered by reliability. The offscreen spans carry the full formatted price.
static PRICE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        "#corePrice_feature_div .a-offscreen",
        "#corePriceDisplay_desktop_feature_div .a-offscreen",
        "#apex_desktop .a-price .a-offscreen",
        "#priceblock_dealprice",
        "#priceblock_ourprice",
        "#price_inside_buybox",
        ".a-price .a-offscreen",
        "#price",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

static PRICE_WHOLE: LazyLock<Selector> = LazyLock::new(|| selector(".a-price .a-price-whole"));
static PRICE_FRACTION: LazyLock<Selector> = LazyLock::new(|| selector(".a-price .a-price-fraction"));
static PRICE_SYMBOL: LazyLock<Selector> = LazyLock::new(|| selector(".a-price .a-price-symbol"));
static AVAILABILITY: LazyLock<Selector> = LazyLock::new(|| selector("#availability"));
static ADD_TO_CART: LazyLock<Selector> =
    LazyLock::new(|| selector("#add-to-cart-button, #buy-now-button"));
static IMAGE: LazyLock<Selector> = LazyLock::new(|| selector("#landingImage, #imgBlkFront"));

const UNAVAILABLE_MARKERS: &[&str] = &[
    "unavailable",
    "out of stock",
    "indisponível",
    "não disponível",
    "sem estoque",
    "no disponible",
];

const AVAILABLE_MARKERS: &[&str] = &["in stock", "em estoque", "disponible", "left in stock"];

/// Amazon product pages on any regional storefront.
#[derive(Debug, Default)]
pub struct AmazonExtractor;

impl AmazonExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PriceExtractor for AmazonExtractor {
    fn name(&self) -> &str {
        "amazon"
    }

    fn matches(&self, host: &str) -> bool {
        host.contains("amazon")
    }

    fn extract(&self, html: &str, url: &Url) -> Result<PageExtract, ExtractionError> {
        let doc = parse_document(html)?;
        let host = url.host_str().unwrap_or_default();

        let price_text = PRICE
            .iter()
            .filter_map(|sel| first_text(&doc, sel))
            .find(|text| parse_price(text).is_some())
            .or_else(|| {
                // Split rendering: symbol, whole part and fraction in separate spans.
                let whole = first_text(&doc, &PRICE_WHOLE)?;
                let whole = whole.trim_end_matches(['.', ',']);
                let fraction = first_text(&doc, &PRICE_FRACTION).unwrap_or_else(|| "00".to_string());
                let symbol = first_text(&doc, &PRICE_SYMBOL).unwrap_or_default();
                // Strip thousands separators so the fraction is the only decimal mark.
                let whole: String = whole.chars().filter(char::is_ascii_digit).collect();
                Some(format!("{}{}.{}", symbol, whole, fraction))
            });

        let is_available = first_text(&doc, &AVAILABILITY)
            .and_then(|text| availability_from_text(&text))
            .or_else(|| doc.select(&ADD_TO_CART).next().map(|_| true));

        let image_url = first_attr(&doc, &IMAGE, "data-old-hires")
            .or_else(|| first_attr(&doc, &IMAGE, "src"))
            .and_then(|raw| absolute_url(url, &raw));

        let extract = PageExtract {
            name: first_text(&doc, &TITLE),
            price: price_text.as_deref().and_then(parse_price),
            currency: price_text.as_deref().and_then(|text| resolve_currency(text, host)),
            is_available,
            image_url,
        };

        Ok(extract.or(structured_data(&doc, url)))
    }
}

fn availability_from_text(text: &str) -> Option<bool> {
    let lower = text.to_lowercase();
    if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(false)
    } else if AVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(true)
    } else {
        None
    }
}
