use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::models::{Alert, Product};
use crate::storage::Storage;
use crate::utils::error::StorageError;
use crate::utils::telemetry::ALERTS_FIRED_TOTAL;

/// An alert whose threshold was crossed by the latest observation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertToFire {
    pub alert: Alert,
    pub old_price: Decimal,
    pub new_price: Decimal,
}

pub struct AlertEvaluator {
    storage: Arc<dyn Storage>,
}

impl AlertEvaluator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Active alerts on `product` that fire for the `old_price -> new_price`
    /// transition.
    pub async fn evaluate(
        &self,
        product: &Product,
        old_price: Decimal,
        new_price: Decimal,
    ) -> Result<Vec<AlertToFire>, StorageError> {
        let alerts = self.storage.get_active_alerts(&product.id).await?;
        let mut firing = Vec::new();

        for mut alert in alerts {
            if alert.should_fire(old_price, new_price) {
                firing.push(AlertToFire {
                    old_price: alert.pending_from.unwrap_or(old_price),
                    alert,
                    new_price,
                });
            } else if alert.is_pending() && new_price > alert.target_price {
                // The undelivered episode ended before any channel got through.
                alert.pending_from = None;
                self.storage.update_alert(&alert).await?;
            }
        }

        if !firing.is_empty() {
            metrics::counter!(ALERTS_FIRED_TOTAL).increment(firing.len() as u64);
            tracing::info!(
                product_id = %product.id,
                "{} alert(s) fired at {} {}",
                firing.len(),
                new_price,
                product.currency
            );
        }

        Ok(firing)
    }

    /// Alerts whose earlier firing was never delivered and still hold at
    /// `price`. Used when a cycle observes no price change.
    pub async fn evaluate_pending(&self, product: &Product, price: Decimal) -> Result<Vec<AlertToFire>, StorageError> {
        let alerts = self.storage.get_active_alerts(&product.id).await?;

        let firing: Vec<AlertToFire> = alerts
            .into_iter()
            .filter(|alert| alert.is_pending() && alert.should_fire(price, price))
            .filter_map(|alert| {
                let old_price = alert.pending_from?;
                Some(AlertToFire {
                    alert,
                    old_price,
                    new_price: price,
                })
            })
            .collect();

        if !firing.is_empty() {
            tracing::info!(
                product_id = %product.id,
                "Retrying {} undelivered alert(s) at {} {}",
                firing.len(),
                price,
                product.currency
            );
        }

        Ok(firing)
    }

    /// Persist that a firing awaits delivery, before any channel is tried.
    pub async fn mark_pending(&self, to_fire: &mut AlertToFire) -> Result<(), StorageError> {
        if to_fire.alert.is_pending() {
            return Ok(());
        }
        to_fire.alert.mark_pending(to_fire.old_price);
        self.storage.update_alert(&to_fire.alert).await
    }

    /// Persist delivery so the alert stays quiet until it re-arms.
    pub async fn mark_notified(&self, alert: &mut Alert) -> Result<(), StorageError> {
        alert.mark_notified(Utc::now());
        self.storage.update_alert(alert).await
    }
}
