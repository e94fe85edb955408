use crate::plugins::extractors::{AmazonExtractor, GenericExtractor, MercadoLivreExtractor};
use crate::plugins::traits::PriceExtractor;

/// Maps a page host to the extraction strategy that understands it.
///
/// Site strategies are consulted in registration order and the first match
/// wins. Hosts nobody claims go to the fallback, so resolution never fails.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn PriceExtractor>>,
    fallback: Box<dyn PriceExtractor>,
}

impl ExtractorRegistry {
    pub fn new(fallback: Box<dyn PriceExtractor>) -> Self {
        Self {
            extractors: Vec::new(),
            fallback,
        }
    }

    /// Registry with every built-in site strategy and the generic fallback.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new(Box::new(GenericExtractor::new()));
        registry.register(Box::new(AmazonExtractor::new()));
        registry.register(Box::new(MercadoLivreExtractor::new()));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn PriceExtractor>) {
        tracing::debug!("Registered extractor: {}", extractor.name());
        self.extractors.push(extractor);
    }

    pub fn resolve(&self, host: &str) -> &dyn PriceExtractor {
        let host = normalize_host(host);
        self.extractors
            .iter()
            .find(|extractor| extractor.matches(&host))
            .map(|extractor| &**extractor)
            .unwrap_or(&*self.fallback)
    }

    pub fn list_extractors(&self) -> Vec<String> {
        self.extractors
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|e| e.name().to_string())
            .collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Lowercase, drop a trailing dot and a leading `www.`.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PageExtract;
    use crate::utils::error::ExtractionError;
    use url::Url;

    struct Fixed(&'static str, &'static str);

    impl PriceExtractor for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn matches(&self, host: &str) -> bool {
            host.contains(self.1)
        }

        fn extract(&self, _html: &str, _url: &Url) -> Result<PageExtract, ExtractionError> {
            Ok(PageExtract::default())
        }
    }

    #[test]
    fn test_resolve_builtin() {
        let registry = ExtractorRegistry::with_builtin();

        assert_eq!(registry.resolve("www.amazon.com.br").name(), "amazon");
        assert_eq!(registry.resolve("WWW.AMAZON.COM").name(), "amazon");
        assert_eq!(registry.resolve("produto.mercadolivre.com.br").name(), "mercadolivre");
        assert_eq!(registry.resolve("www.kabum.com.br").name(), "generic");
        assert_eq!(registry.resolve("").name(), "generic");
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut registry = ExtractorRegistry::new(Box::new(GenericExtractor::new()));
        registry.register(Box::new(Fixed("first", "shop")));
        registry.register(Box::new(Fixed("second", "shop.example")));

        assert_eq!(registry.resolve("shop.example.com").name(), "first");
        assert_eq!(registry.list_extractors(), vec!["first", "second", "generic"]);
    }

    #[test]
    fn test_new_site_without_touching_dispatch() {
        let mut registry = ExtractorRegistry::with_builtin();
        registry.register(Box::new(Fixed("kabum", "kabum")));

        assert_eq!(registry.resolve("www.kabum.com.br").name(), "kabum");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("WWW.Amazon.com.br."), "amazon.com.br");
        assert_eq!(normalize_host("shop.example.com"), "shop.example.com");
    }
}
