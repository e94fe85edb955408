use thiserror::Error;

use crate::models::ChannelKind;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scrape error: {0}")]
    Scrape(#[from] ScrapeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(format!("{}", err))
    }
}

/// Failure of a single outbound page request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Network failures, timeouts, 5xx, 408 and 429 are expected to clear up
    /// by the next cycle. Other 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::HttpStatus(code) => *code >= 500 || *code == 408 || *code == 429,
            FetchError::InvalidUrl(_) => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("price not found on page ({extractor})")]
    PriceNotFound { extractor: String },

    #[error("unparseable price text: {0:?}")]
    InvalidPrice(String),

    #[error("empty page body")]
    EmptyPage,
}

/// Outcome of a failed `scrape(url)` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("invalid product URL {0:?}")]
    InvalidUrl(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("scrape cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::Fetch(e) => e.is_transient(),
            ScrapeError::Cancelled => true,
            _ => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0} channel is not enabled")]
    ChannelUnavailable(ChannelKind),

    #[error("no recipient configured for {0}")]
    MissingRecipient(ChannelKind),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("{channel} returned HTTP {status}: {body}")]
    Http {
        channel: ChannelKind,
        status: u16,
        body: String,
    },

    #[error("{channel} transport error: {message}")]
    Transport {
        channel: ChannelKind,
        message: String,
    },

    #[error("{channel} rejected the message: {message}")]
    Rejected {
        channel: ChannelKind,
        message: String,
    },
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Http { status, .. } => *status >= 500 || *status == 429,
            DispatchError::Transport { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
