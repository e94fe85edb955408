//! Formats a fired alert and fans it out to the alert's channels.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::NotificationsConfig;
use crate::models::{Alert, ChannelKind, Product};
use crate::plugins::notifiers::{DiscordNotifier, EmailNotifier, TelegramNotifier};
use crate::plugins::NotificationChannel;
use crate::utils::error::DispatchError;
use crate::utils::telemetry::NOTIFICATIONS_TOTAL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    pub fn build(alert: &Alert, product: &Product, old_price: Decimal) -> Self {
        let new_price = product.current_price;
        let currency = &product.currency;
        let name = product.display_name();

        let drop = if old_price.is_zero() {
            "n/a".to_string()
        } else {
            let percent = (old_price - new_price) / old_price * Decimal::ONE_HUNDRED;
            format!("{}%", percent.round_dp(2).normalize())
        };
        let difference = (old_price - new_price).normalize();

        let body = format!(
            "{name}\n\n\
             Old price: {old} {currency}\n\
             New price: {new} {currency}\n\
             Price drop: {drop} ({difference} {currency})\n\
             Target price: {target} {currency}\n\n\
             View product: {url}\n",
            name = name,
            old = old_price.normalize(),
            new = new_price.normalize(),
            currency = currency,
            drop = drop,
            difference = difference,
            target = alert.target_price.normalize(),
            url = product.url,
        );

        Self {
            subject: format!("Price Alert: {}", name),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOutcome {
    pub channel: ChannelKind,
    pub result: Result<(), DispatchError>,
}

/// Per-channel results for one alert.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub alert_id: String,
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    pub fn any_delivered(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_ok())
    }

    pub fn is_success(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> Vec<(ChannelKind, &DispatchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.channel, e)))
            .collect()
    }
}

#[derive(Default)]
pub struct NotificationDispatcher {
    channels: HashMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every channel enabled in `config`.
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, DispatchError> {
        let mut dispatcher = Self::new();

        if config.email.enabled {
            dispatcher.register(Arc::new(EmailNotifier::new(&config.email)?));
        }
        if config.telegram.enabled {
            dispatcher.register(Arc::new(TelegramNotifier::new(&config.telegram)?));
        }
        if config.discord.enabled {
            dispatcher.register(Arc::new(DiscordNotifier::new(&config.discord)?));
        }

        Ok(dispatcher)
    }

    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        tracing::debug!("Registered notification channel: {}", channel.kind());
        self.channels.insert(channel.kind(), channel);
    }

    pub fn available_channels(&self) -> Vec<ChannelKind> {
        let mut kinds: Vec<ChannelKind> = self.channels.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Send to every channel of the alert. One channel failing never stops
    /// the others.
    pub async fn dispatch(&self, alert: &Alert, product: &Product, old_price: Decimal) -> DispatchReport {
        let message = AlertMessage::build(alert, product, old_price);

        let sends = alert.channels.iter().map(|&kind| {
            let message = &message;
            async move {
                let result = self.send_one(kind, alert, message).await;
                let outcome = if result.is_ok() { "success" } else { "failure" };
                metrics::counter!(NOTIFICATIONS_TOTAL, "channel" => kind.as_str(), "outcome" => outcome)
                    .increment(1);

                match &result {
                    Ok(()) => tracing::info!(alert_id = %alert.id, "Notification sent via {}", kind),
                    Err(e) => tracing::warn!(alert_id = %alert.id, "Notification via {} failed: {}", kind, e),
                }
                ChannelOutcome { channel: kind, result }
            }
        });

        DispatchReport {
            alert_id: alert.id.clone(),
            outcomes: join_all(sends).await,
        }
    }

    async fn send_one(&self, kind: ChannelKind, alert: &Alert, message: &AlertMessage) -> Result<(), DispatchError> {
        let channel = self
            .channels
            .get(&kind)
            .ok_or(DispatchError::ChannelUnavailable(kind))?;

        let recipient = if kind.is_addressable() {
            alert.recipient.clone().or_else(|| channel.default_recipient())
        } else {
            channel.default_recipient()
        }
        .ok_or(DispatchError::MissingRecipient(kind))?;

        channel.send(&recipient, &message.subject, &message.body).await
    }
}
