use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_response, http_client, send_with_retry, transport_error, truncate};
use crate::config::DiscordConfig;
use crate::models::ChannelKind;
use crate::plugins::traits::NotificationChannel;
use crate::utils::error::DispatchError;

const EMBED_COLOR: u32 = 0x00ff00; // Green for price drops
const MAX_TITLE_CHARS: usize = 256;
const MAX_DESCRIPTION_CHARS: usize = 4096;

/// Posts alerts to a Discord webhook as a single embed.
pub struct DiscordNotifier {
    client: Client,
    webhook_url: Option<String>,
    username: String,
    avatar_url: Option<String>,
}

impl DiscordNotifier {
    pub fn new(config: &DiscordConfig) -> Result<Self, DispatchError> {
        Ok(Self {
            client: http_client(ChannelKind::Discord)?,
            webhook_url: config.webhook_url.clone().filter(|u| !u.trim().is_empty()),
            username: config.username.clone(),
            avatar_url: config.avatar_url.clone(),
        })
    }

    fn create_payload(&self, subject: &str, body: &str) -> serde_json::Value {
        let mut payload = json!({
            "username": self.username,
            "embeds": [{
                "title": truncate(&format!("📉 {}", subject), MAX_TITLE_CHARS),
                "description": truncate(body, MAX_DESCRIPTION_CHARS),
                "color": EMBED_COLOR,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "footer": { "text": self.username },
            }]
        });

        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }
}

#[async_trait]
impl NotificationChannel for DiscordNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
    }

    fn default_recipient(&self) -> Option<String> {
        self.webhook_url.clone()
    }

    /// `recipient` is the webhook URL.
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::MissingRecipient(ChannelKind::Discord));
        }
        if subject.trim().is_empty() && body.trim().is_empty() {
            return Err(DispatchError::InvalidMessage("empty notification".to_string()));
        }

        let payload = self.create_payload(subject, body);
        let (client, payload) = (&self.client, &payload);

        send_with_retry(ChannelKind::Discord, || async move {
            let response = client
                .post(recipient)
                .json(payload)
                .send()
                .await
                .map_err(|e| transport_error(ChannelKind::Discord, e))?;
            check_response(ChannelKind::Discord, response).await
        })
        .await?;

        tracing::debug!("Discord webhook delivered");
        Ok(())
    }
}
