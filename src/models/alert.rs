use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{generate_id, ChannelKind};

/// A subscriber's price threshold on one product.
///
/// Alerts are edge-triggered: `notified_at` records the last delivery, and an
/// alert that already notified stays quiet while the price sits at or below
/// the target. It re-arms once an observed price goes back above the target.
///
/// `pending_from` holds the price an undelivered firing started from. It is
/// set before delivery is attempted and cleared once a channel delivers, so a
/// failed episode fires again on the next observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub product_id: String,
    pub target_price: Decimal,
    pub is_active: bool,
    pub channels: Vec<ChannelKind>,
    /// Address for addressable channels (email, Telegram chat id). Falls back
    /// to the channel default when unset.
    pub recipient: Option<String>,
    pub created_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending_from: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAlert {
    #[validate(length(min = 1))]
    pub product_id: String,
    #[validate(custom(function = "validate_target_price"))]
    pub target_price: Decimal,
    #[validate(length(min = 1, message = "at least one notification channel is required"))]
    pub channels: Vec<ChannelKind>,
    pub recipient: Option<String>,
}

fn validate_target_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() {
        return Err(ValidationError::new("negative_target_price"));
    }
    Ok(())
}

impl Alert {
    pub fn new(new_alert: NewAlert) -> Self {
        let mut channels = new_alert.channels;
        channels.sort();
        channels.dedup();

        Self {
            id: generate_id(),
            product_id: new_alert.product_id,
            target_price: new_alert.target_price,
            is_active: true,
            channels,
            recipient: new_alert.recipient.filter(|r| !r.trim().is_empty()),
            created_at: Utc::now(),
            notified_at: None,
            pending_from: None,
        }
    }

    /// Edge-triggered firing rule: the new price is within range and either
    /// it just crossed into range, this alert has never notified, or an
    /// earlier firing is still undelivered.
    pub fn should_fire(&self, old_price: Decimal, new_price: Decimal) -> bool {
        self.is_active
            && new_price <= self.target_price
            && (old_price > self.target_price || self.notified_at.is_none() || self.is_pending())
    }

    pub fn is_pending(&self) -> bool {
        self.pending_from.is_some()
    }

    /// Record that a firing from `old_price` awaits delivery. An episode that
    /// is already pending keeps its original starting price.
    pub fn mark_pending(&mut self, old_price: Decimal) {
        self.pending_from.get_or_insert(old_price);
    }

    pub fn mark_notified(&mut self, at: DateTime<Utc>) {
        self.notified_at = Some(at);
        self.pending_from = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(target: i64) -> Alert {
        Alert::new(NewAlert {
            product_id: "product123".to_string(),
            target_price: Decimal::from(target),
            channels: vec![ChannelKind::Telegram, ChannelKind::Email, ChannelKind::Email],
            recipient: Some("  ".to_string()),
        })
    }

    #[test]
    fn test_alert_creation() {
        let alert = alert(100);

        assert!(alert.is_active);
        assert!(alert.notified_at.is_none());
        assert_eq!(alert.channels, vec![ChannelKind::Email, ChannelKind::Telegram]);
        assert!(alert.recipient.is_none());
    }

    #[test]
    fn test_should_fire_rules() {
        let mut alert = alert(100);
        let d = |v: i64| Decimal::from(v);

        // First entry into range fires even without a crossing.
        assert!(alert.should_fire(d(95), d(90)));
        // Crossing down fires.
        assert!(alert.should_fire(d(120), d(95)));
        // Exactly at target counts as in range.
        assert!(alert.should_fire(d(120), d(100)));
        // Above target never fires.
        assert!(!alert.should_fire(d(90), d(101)));

        alert.mark_notified(Utc::now());
        assert!(!alert.should_fire(d(95), d(90)));
        assert!(!alert.should_fire(d(100), d(95)));
        assert!(alert.should_fire(d(110), d(90)));

        alert.is_active = false;
        assert!(!alert.should_fire(d(110), d(90)));
    }

    #[test]
    fn test_pending_firing_fires_until_delivered() {
        let mut alert = alert(100);
        let d = |v: i64| Decimal::from(v);
        alert.mark_notified(Utc::now());

        alert.mark_pending(d(110));
        alert.mark_pending(d(95));
        assert_eq!(alert.pending_from, Some(d(110)));
        // No crossing, but the earlier firing was never delivered.
        assert!(alert.should_fire(d(95), d(85)));
        assert!(!alert.should_fire(d(95), d(105)));

        alert.mark_notified(Utc::now());
        assert!(!alert.is_pending());
        assert!(!alert.should_fire(d(85), d(80)));
    }

    #[test]
    fn test_new_alert_validation() {
        let valid = NewAlert {
            product_id: "p1".to_string(),
            target_price: Decimal::from(50),
            channels: vec![ChannelKind::Email],
            recipient: None,
        };
        assert!(valid.validate().is_ok());

        let negative = NewAlert {
            target_price: Decimal::from(-1),
            ..valid.clone()
        };
        assert!(negative.validate().is_err());

        let no_channels = NewAlert {
            channels: vec![],
            ..valid
        };
        assert!(no_channels.validate().is_err());
    }
}
