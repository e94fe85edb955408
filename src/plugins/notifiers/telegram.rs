use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_response, http_client, send_with_retry, transport_error, truncate};
use crate::config::TelegramConfig;
use crate::models::ChannelKind;
use crate::plugins::traits::NotificationChannel;
use crate::utils::error::DispatchError;

// Bot API message length limit.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Sends alerts through the Telegram Bot API `sendMessage` method.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, DispatchError> {
        if config.token.trim().is_empty() {
            return Err(DispatchError::ChannelUnavailable(ChannelKind::Telegram));
        }

        Ok(Self {
            client: http_client(ChannelKind::Telegram)?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            chat_id: config.chat_id.clone().filter(|c| !c.trim().is_empty()),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

#[async_trait]
impl NotificationChannel for TelegramNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn default_recipient(&self) -> Option<String> {
        self.chat_id.clone()
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::MissingRecipient(ChannelKind::Telegram));
        }

        let text = truncate(&format!("{}\n\n{}", subject, body), MAX_MESSAGE_CHARS);
        let payload = json!({
            "chat_id": recipient,
            "text": text,
            "disable_web_page_preview": false,
        });
        let endpoint = self.endpoint();
        let (client, endpoint, payload) = (&self.client, endpoint.as_str(), &payload);

        send_with_retry(ChannelKind::Telegram, || async move {
            let response = client
                .post(endpoint)
                .json(payload)
                .send()
                .await
                .map_err(|e| transport_error(ChannelKind::Telegram, e))?;
            check_response(ChannelKind::Telegram, response).await
        })
        .await?;

        tracing::debug!("Telegram message delivered to chat {}", recipient);
        Ok(())
    }
}
