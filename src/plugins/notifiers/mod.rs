// Notification channel implementations
pub mod discord;
pub mod email;
pub mod telegram;

pub use discord::DiscordNotifier;
pub use email::EmailNotifier;
pub use telegram::TelegramNotifier;

use reqwest::Client;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::models::ChannelKind;
use crate::utils::error::DispatchError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
// 100ms then 1s between attempts.
const RETRY_BASE_MS: u64 = 10;
const RETRY_FACTOR: u64 = 10;
const MAX_RETRIES: usize = 2;

pub(crate) fn http_client(kind: ChannelKind) -> Result<Client, DispatchError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| DispatchError::Transport {
            channel: kind,
            message: format!("failed to build HTTP client: {}", e),
        })
}

/// Run `op`, retrying transient failures with exponential backoff.
pub(crate) async fn send_with_retry<F, Fut>(kind: ChannelKind, op: F) -> Result<(), DispatchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DispatchError>>,
{
    let strategy = ExponentialBackoff::from_millis(RETRY_BASE_MS)
        .factor(RETRY_FACTOR)
        .max_delay(Duration::from_secs(5))
        .map(jitter)
        .take(MAX_RETRIES);

    RetryIf::spawn(strategy, op, |err: &DispatchError| {
        let transient = err.is_transient();
        if transient {
            tracing::warn!(channel = %kind, "Transient delivery failure: {}", err);
        }
        transient
    })
    .await
}

/// Map a reqwest failure without leaking the request URL, which may carry a
/// bot token or webhook secret.
pub(crate) fn transport_error(kind: ChannelKind, err: reqwest::Error) -> DispatchError {
    DispatchError::Transport {
        channel: kind,
        message: err.without_url().to_string(),
    }
}

pub(crate) async fn check_response(kind: ChannelKind, response: reqwest::Response) -> Result<(), DispatchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(DispatchError::Http {
        channel: kind,
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

/// Cut `text` to at most `max` characters.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicUsize::new(0);
        let result = send_with_retry(ChannelKind::Telegram, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DispatchError::Http {
                    channel: ChannelKind::Telegram,
                    status: 400,
                    body: "bad request".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let calls = AtomicUsize::new(0);
        let result = send_with_retry(ChannelKind::Discord, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(DispatchError::Transport {
                    channel: ChannelKind::Discord,
                    message: "connection reset".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("preço", 4), "preç");
        assert_eq!(truncate("short", 10), "short");
    }
}
