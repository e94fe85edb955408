use url::Url;

use crate::models::PageExtract;
use crate::utils::error::ExtractionError;

/// Site specific strategy for reading product data out of a fetched page.
///
/// Implementations are pure: no I/O, no shared state. The orchestrator owns
/// fetching and applies defaults to whatever fields come back empty.
pub trait PriceExtractor: Send + Sync {
    /// Stable identifier, recorded on every snapshot this strategy produces.
    fn name(&self) -> &str;

    /// Whether pages served from `host` belong to this strategy. The host has
    /// already been lowercased and stripped of a leading `www.`.
    fn matches(&self, host: &str) -> bool;

    fn extract(&self, html: &str, url: &Url) -> Result<PageExtract, ExtractionError>;
}
