//! Outbound page fetching with a per-request timeout, a fixed user agent and
//! an optional per-host politeness delay.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::config::ScraperConfig;
use crate::utils::error::FetchError;

const SCRAPER_API_ENDPOINT: &str = "http://api.scraperapi.com/";

type HostRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Raw page returned by a successful fetch.
#[derive(Debug, Clone)]
pub struct RawContent {
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub body: String,
}

/// One outbound request per call. No retries happen at this layer.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Wait until the URL's host may be contacted again. Callers run this
    /// before taking a worker slot so a busy host never blocks the others.
    async fn wait_turn(&self, _url: &Url) {}

    async fn fetch(&self, url: &Url) -> Result<RawContent, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
    limiter: Option<HostRateLimiter>,
    scraper_api: Option<ScraperApi>,
}

struct ScraperApi {
    api_key: String,
    render: bool,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| FetchError::Network(format!("invalid user agent: {}", e)))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {}", e)))?;

        let limiter = Quota::with_period(config.request_delay()).map(RateLimiter::keyed);

        let scraper_api = config.scraper_api_key.as_ref().filter(|k| !k.is_empty()).map(|key| ScraperApi {
            api_key: key.clone(),
            render: config.scraper_api_render,
        });

        Ok(Self {
            client,
            timeout: config.request_timeout(),
            limiter,
            scraper_api,
        })
    }

    fn request_url(&self, url: &Url) -> Result<Url, FetchError> {
        match &self.scraper_api {
            Some(api) => {
                let render = if api.render { "true" } else { "false" };
                Url::parse_with_params(
                    SCRAPER_API_ENDPOINT,
                    &[("api_key", api.api_key.as_str()), ("url", url.as_str()), ("render", render)],
                )
                .map_err(|e| FetchError::InvalidUrl(e.to_string()))
            }
            None => Ok(url.clone()),
        }
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout.as_secs())
        } else if err.is_builder() {
            FetchError::InvalidUrl(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn wait_turn(&self, url: &Url) {
        if let (Some(limiter), Some(host)) = (&self.limiter, url.host_str()) {
            limiter.until_key_ready(&host.to_ascii_lowercase()).await;
        }
    }

    async fn fetch(&self, url: &Url) -> Result<RawContent, FetchError> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let request_url = self.request_url(url)?;
        tracing::debug!("Fetching {}", url);

        let response = self
            .client
            .get(request_url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!("Fetch of {} returned {}", url, status);
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        // Through the proxy the final URL is the proxy's; report the product's.
        let final_url = if self.scraper_api.is_some() {
            url.clone()
        } else {
            response.url().clone()
        };

        let body = response.text().await.map_err(|e| self.map_error(e))?;

        Ok(RawContent {
            final_url,
            status: status.as_u16(),
            body,
        })
    }
}
