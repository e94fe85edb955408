use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::send_with_retry;
use crate::config::EmailConfig;
use crate::models::ChannelKind;
use crate::plugins::traits::NotificationChannel;
use crate::utils::error::DispatchError;

/// Plain-text alert mail over SMTP.
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    default_recipient: Option<String>,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, DispatchError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host).map_err(|e| DispatchError::Transport {
                channel: ChannelKind::Email,
                message: e.to_string(),
            })?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port);

        let builder = match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                builder.credentials(Credentials::new(username.clone(), password.clone()))
            }
            _ => builder,
        };

        let address: Address = config.from_address.parse().map_err(|e| {
            DispatchError::InvalidMessage(format!("invalid from address {}: {}", config.from_address, e))
        })?;

        Ok(Self {
            mailer: builder.build(),
            from: Mailbox::new(Some(config.from_name.clone()), address),
            default_recipient: config.default_recipient.clone().filter(|r| !r.trim().is_empty()),
        })
    }

    pub fn build_message(&self, recipient: &str, subject: &str, body: &str) -> Result<Message, DispatchError> {
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|e| DispatchError::InvalidMessage(format!("invalid recipient {}: {}", recipient, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| DispatchError::InvalidMessage(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailNotifier {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn default_recipient(&self) -> Option<String> {
        self.default_recipient.clone()
    }

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::MissingRecipient(ChannelKind::Email));
        }
        let message = self.build_message(recipient, subject, body)?;

        let mailer = &self.mailer;

        send_with_retry(ChannelKind::Email, || {
            let message = message.clone();
            async move {
                mailer.send(message).await.map(|_| ()).map_err(|e| {
                    if e.is_permanent() {
                        DispatchError::Rejected {
                            channel: ChannelKind::Email,
                            message: e.to_string(),
                        }
                    } else {
                        DispatchError::Transport {
                            channel: ChannelKind::Email,
                            message: e.to_string(),
                        }
                    }
                })
            }
        })
        .await?;

        tracing::debug!("Email delivered to {}", recipient);
        Ok(())
    }
}
