// Price extraction strategies
pub mod amazon;
pub mod generic;
pub mod mercado_livre;
pub mod price_parser;

pub use amazon::AmazonExtractor;
pub use generic::GenericExtractor;
pub use mercado_livre::MercadoLivreExtractor;

use rust_decimal::Decimal;
use scraper::{Html, Selector};
use std::str::FromStr;
use url::Url;

use crate::utils::error::ExtractionError;

pub(crate) fn parse_document(html: &str) -> Result<Html, ExtractionError> {
    if html.trim().is_empty() {
        return Err(ExtractionError::EmptyPage);
    }
    Ok(Html::parse_document(html))
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the first element matching `selector` that has any.
pub(crate) fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .find(|text| !text.is_empty())
}

pub(crate) fn first_attr(doc: &Html, selector: &Selector, attr: &str) -> Option<String> {
    doc.select(selector)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// `content` of a `<meta>` keyed by `property`, `name` or `itemprop`.
pub(crate) fn meta_content(doc: &Html, key: &str) -> Option<String> {
    let css = format!(
        r#"meta[property="{key}"], meta[name="{key}"], meta[itemprop="{key}"]"#,
        key = key
    );
    let selector = Selector::parse(&css).ok()?;
    first_attr(doc, &selector, "content")
}

pub(crate) fn absolute_url(base: &Url, raw: &str) -> Option<String> {
    base.join(raw.trim()).ok().map(String::from)
}

/// Prices from structured markup always use `.` as the decimal mark, so try a
/// plain decimal parse before the locale aware one.
pub(crate) fn parse_structured_price(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    match Decimal::from_str(trimmed) {
        Ok(price) if !price.is_sign_negative() => Some(price.normalize()),
        Ok(_) => None,
        Err(_) => price_parser::parse_price(trimmed),
    }
}

/// Map a schema.org availability value (`https://schema.org/InStock`,
/// `OutOfStock`, `instock`) to a flag.
pub(crate) fn availability_from_schema(raw: &str) -> Option<bool> {
    let value = raw.rsplit('/').next().unwrap_or(raw).trim().to_ascii_lowercase();
    match value.as_str() {
        "instock" | "in stock" | "limitedavailability" | "onlineonly" | "preorder" | "presale"
        | "instoreonly" => Some(true),
        "outofstock" | "out of stock" | "soldout" | "discontinued" => Some(false),
        _ => None,
    }
}
