use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

static PRICE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*").expect("valid price regex"));

static ISO_CODE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(BRL|USD|EUR|GBP|AUD|CAD|MXN|ARS|CLP|JPY|INR)\b").expect("valid currency regex")
});

// Longer symbols first so `R$` and `US$` win over a bare `$`.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("AU$", "AUD"),
    ("CA$", "CAD"),
    ("MX$", "MXN"),
    ("R$", "BRL"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
];

const TLD_CURRENCIES: &[(&str, &str)] = &[
    (".com.br", "BRL"),
    (".br", "BRL"),
    (".com.au", "AUD"),
    (".au", "AUD"),
    (".co.uk", "GBP"),
    (".uk", "GBP"),
    (".com.mx", "MXN"),
    (".mx", "MXN"),
    (".com.ar", "ARS"),
    (".ar", "ARS"),
    (".cl", "CLP"),
    (".ca", "CAD"),
    (".de", "EUR"),
    (".fr", "EUR"),
    (".es", "EUR"),
    (".it", "EUR"),
    (".nl", "EUR"),
    (".pt", "EUR"),
    (".co.jp", "JPY"),
    (".jp", "JPY"),
    (".in", "INR"),
];

/// Parse the first price in `text`, accepting both `1,299.99` and `1.299,99`.
///
/// When both separators appear the last one is the decimal mark. A lone
/// separator followed by one or two digits is a decimal mark; anything else
/// is a thousands separator.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let raw = PRICE_REGEX.find(text)?.as_str();
    let price = Decimal::from_str(&normalize_separators(raw)).ok()?;
    Some(price.normalize())
}

fn normalize_separators(raw: &str) -> String {
    let last_dot = raw.rfind('.');
    let last_comma = raw.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal_at, thousands) = if dot > comma { (dot, ',') } else { (comma, '.') };
            let (int_part, frac_part) = raw.split_at(decimal_at);
            format!("{}.{}", int_part.replace(thousands, "").replace(['.', ','], ""), &frac_part[1..])
        }
        (Some(pos), None) | (None, Some(pos)) => {
            let separator = raw.as_bytes()[pos] as char;
            let occurrences = raw.matches(separator).count();
            let digits_after = raw.len() - pos - 1;

            if occurrences == 1 && (1..=2).contains(&digits_after) {
                raw.replace(separator, ".")
            } else {
                raw.replace(separator, "")
            }
        }
        (None, None) => raw.to_string(),
    }
}

/// Currency named explicitly in `text` by symbol or ISO code. A bare `$` is
/// ambiguous and yields `None`.
pub fn detect_currency(text: &str) -> Option<String> {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if text.contains(symbol) {
            return Some(code.to_string());
        }
    }

    ISO_CODE_REGEX
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Currency implied by the country code top level domain of `host`.
pub fn currency_for_host(host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    TLD_CURRENCIES
        .iter()
        .find(|(suffix, _)| host.ends_with(suffix))
        .map(|(_, code)| code.to_string())
}

/// Resolution order: explicit symbol or code in the price text, then the
/// host's country domain, then a bare `$` on a `.com`/`.us` host.
pub fn resolve_currency(price_text: &str, host: &str) -> Option<String> {
    if let Some(code) = detect_currency(price_text) {
        return Some(code);
    }

    if let Some(code) = currency_for_host(host) {
        return Some(code);
    }

    let host = host.to_ascii_lowercase();
    if price_text.contains('$') && (host.ends_with(".com") || host.ends_with(".us")) {
        return Some("USD".to_string());
    }

    None
}

/// Normalize an explicit currency code found in markup (`brl`, ` USD `).
pub fn normalize_currency_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        detect_currency(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("$19.99", "19.99")]
    #[case("$1,299.99", "1299.99")]
    #[case("R$ 1.299,90", "1299.9")]
    #[case("R$ 199,90", "199.9")]
    #[case("1.299", "1299")]
    #[case("1,299", "1299")]
    #[case("€ 1.234.567,89", "1234567.89")]
    #[case("Price: 42", "42")]
    #[case("R$ 199,90 em 10x de R$ 19,99", "199.9")]
    #[case("0,5", "0.5")]
    fn test_parse_price(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(parse_price(input), Some(Decimal::from_str(expected).unwrap()));
    }

    #[test]
    fn test_parse_price_failure() {
        assert_eq!(parse_price("not a price"), None);
        assert_eq!(parse_price(""), None);
    }

    #[rstest]
    #[case("R$ 10,00", Some("BRL"))]
    #[case("US$19.99", Some("USD"))]
    #[case("€50.00", Some("EUR"))]
    #[case("£5", Some("GBP"))]
    #[case("19.99 USD", Some("USD"))]
    #[case("$19.99", None)]
    #[case("19.99", None)]
    fn test_detect_currency(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(detect_currency(input).as_deref(), expected);
    }

    #[rstest]
    #[case("www.amazon.com.br", Some("BRL"))]
    #[case("produto.mercadolivre.com.br", Some("BRL"))]
    #[case("example.co.uk", Some("GBP"))]
    #[case("shop.example.com.au", Some("AUD"))]
    #[case("example.de", Some("EUR"))]
    #[case("example.com", None)]
    fn test_currency_for_host(#[case] host: &str, #[case] expected: Option<&str>) {
        assert_eq!(currency_for_host(host).as_deref(), expected);
    }

    #[test]
    fn test_resolve_currency_priority() {
        // Explicit symbol wins over the host.
        assert_eq!(resolve_currency("US$ 25.99", "www.amazon.com.br").as_deref(), Some("USD"));
        // Bare dollar on a Brazilian host is the host's currency.
        assert_eq!(resolve_currency("$ 25,99", "www.amazon.com.br").as_deref(), Some("BRL"));
        // Bare dollar on .com is USD.
        assert_eq!(resolve_currency("$25.99", "www.amazon.com").as_deref(), Some("USD"));
        // Nothing to go on.
        assert_eq!(resolve_currency("25.99", "shop.example.xyz"), None);
    }

    #[test]
    fn test_normalize_currency_code() {
        assert_eq!(normalize_currency_code(" brl ").as_deref(), Some("BRL"));
        assert_eq!(normalize_currency_code("R$").as_deref(), Some("BRL"));
        assert_eq!(normalize_currency_code("dollars"), None);
    }
}
