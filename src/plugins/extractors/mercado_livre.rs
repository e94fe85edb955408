use rust_decimal::Decimal;
use scraper::Selector;
use std::str::FromStr;
use std::sync::LazyLock;
use url::Url;

use super::generic::structured_data;
use super::price_parser::{currency_for_host, detect_currency, normalize_currency_code};
use super::{
    absolute_url, availability_from_schema, first_attr, first_text, meta_content, parse_document,
    parse_structured_price,
};
use crate::models::PageExtract;
use crate::plugins::traits::PriceExtractor;
use crate::utils::error::ExtractionError;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("h1.ui-pdp-title"));
static PRICE_FRACTION: LazyLock<Selector> = LazyLock::new(|| {
    selector(".ui-pdp-price__second-line .andes-money-amount__fraction, .andes-money-amount__fraction")
});
static PRICE_CENTS: LazyLock<Selector> = LazyLock::new(|| {
    selector(".ui-pdp-price__second-line .andes-money-amount__cents, .andes-money-amount__cents")
});
static CURRENCY_SYMBOL: LazyLock<Selector> =
    LazyLock::new(|| selector(".andes-money-amount__currency-symbol"));
static STOCK: LazyLock<Selector> =
    LazyLock::new(|| selector(".ui-pdp-stock-information__title, .ui-pdp-buybox__quantity"));
static PAUSED: LazyLock<Selector> =
    LazyLock::new(|| selector(".ui-pdp-message--warning, .ui-pdp-shipping-message__text"));
static GALLERY_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector("figure.ui-pdp-gallery__figure img"));

/// Mercado Livre / Mercado Libre listing pages.
#[derive(Debug, Default)]
pub struct MercadoLivreExtractor;

impl MercadoLivreExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl PriceExtractor for MercadoLivreExtractor {
    fn name(&self) -> &str {
        "mercadolivre"
    }

    fn matches(&self, host: &str) -> bool {
        host.contains("mercadolivre") || host.contains("mercadolibre")
    }

    fn extract(&self, html: &str, url: &Url) -> Result<PageExtract, ExtractionError> {
        let doc = parse_document(html)?;
        let host = url.host_str().unwrap_or_default();

        let price = meta_content(&doc, "price")
            .and_then(|raw| parse_structured_price(&raw))
            .or_else(|| {
                // Fraction is rendered with `.` thousands separators ("1.299").
                let fraction = first_text(&doc, &PRICE_FRACTION)?;
                let digits: String = fraction.chars().filter(char::is_ascii_digit).collect();
                let cents = first_text(&doc, &PRICE_CENTS)
                    .map(|c| c.chars().filter(char::is_ascii_digit).collect::<String>())
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "0".to_string());
                Decimal::from_str(&format!("{}.{}", digits, cents)).ok().map(|d| d.normalize())
            });

        let currency = meta_content(&doc, "priceCurrency")
            .and_then(|raw| normalize_currency_code(&raw))
            .or_else(|| first_text(&doc, &CURRENCY_SYMBOL).and_then(|s| detect_currency(&s)))
            .or_else(|| currency_for_host(host));

        let is_available = meta_content(&doc, "availability")
            .and_then(|raw| availability_from_schema(&raw))
            .or_else(|| first_text(&doc, &PAUSED).and_then(|text| paused_listing(&text)))
            .or_else(|| first_text(&doc, &STOCK).map(|text| !text.to_lowercase().contains("esgotado")));

        let image_url = meta_content(&doc, "og:image")
            .or_else(|| first_attr(&doc, &GALLERY_IMAGE, "data-zoom"))
            .or_else(|| first_attr(&doc, &GALLERY_IMAGE, "src"))
            .and_then(|raw| absolute_url(url, &raw));

        let extract = PageExtract {
            name: first_text(&doc, &TITLE),
            price,
            currency,
            is_available,
            image_url,
        };

        Ok(extract.or(structured_data(&doc, url)))
    }
}

fn paused_listing(text: &str) -> Option<bool> {
    let lower = text.to_lowercase();
    let paused = ["pausada", "pausado", "finalizada", "esgotado", "sem estoque"];
    paused.iter().any(|m| lower.contains(m)).then_some(false)
}
