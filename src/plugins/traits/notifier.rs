use async_trait::async_trait;

use crate::models::ChannelKind;
use crate::utils::error::DispatchError;

/// A delivery channel for alert notifications (email, chat bot, webhook).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Address used when an alert does not name its own recipient.
    fn default_recipient(&self) -> Option<String>;

    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), DispatchError>;
}
