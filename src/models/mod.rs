use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod alert;
pub mod price_history;
pub mod product;
pub mod snapshot;

// Re-exports for convenience
pub use alert::*;
pub use price_history::*;
pub use product::*;
pub use snapshot::*;

/// Delivery channel an alert can be routed through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    Telegram,
    Discord,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Email, ChannelKind::Telegram, ChannelKind::Discord];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Discord => "discord",
        }
    }

    /// Channels whose destination can be chosen per alert. A Discord webhook
    /// carries its own destination.
    pub fn is_addressable(&self) -> bool {
        matches!(self, ChannelKind::Email | ChannelKind::Telegram)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(ChannelKind::Email),
            "telegram" => Ok(ChannelKind::Telegram),
            "discord" => Ok(ChannelKind::Discord),
            other => Err(format!("unsupported notification channel: {}", other)),
        }
    }
}

/// Serialize a channel list into the comma separated form used in storage.
pub fn join_channels(channels: &[ChannelKind]) -> String {
    channels.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
}

pub fn split_channels(raw: &str) -> Result<Vec<ChannelKind>, String> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(ChannelKind::from_str)
        .collect()
}

// Helper function to generate UUIDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_kind_serialization() {
        assert_eq!(serde_json::to_string(&ChannelKind::Email).unwrap(), "\"email\"");
        assert_eq!(serde_json::to_string(&ChannelKind::Telegram).unwrap(), "\"telegram\"");
        assert_eq!(serde_json::to_string(&ChannelKind::Discord).unwrap(), "\"discord\"");
    }

    #[test]
    fn test_channel_kind_parsing() {
        assert_eq!("EMAIL".parse::<ChannelKind>(), Ok(ChannelKind::Email));
        assert_eq!(" telegram ".parse::<ChannelKind>(), Ok(ChannelKind::Telegram));
        assert!("sms".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_channel_list_round_trip() {
        let channels = vec![ChannelKind::Email, ChannelKind::Discord];
        let joined = join_channels(&channels);
        assert_eq!(joined, "email,discord");
        assert_eq!(split_channels(&joined).unwrap(), channels);
        assert!(split_channels("").unwrap().is_empty());
        assert!(split_channels("email,pager").is_err());
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 32);
        assert!(!id1.contains('-'));
    }
}
