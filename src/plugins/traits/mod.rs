pub mod extractor;
pub mod notifier;

pub use extractor::PriceExtractor;
pub use notifier::NotificationChannel;

#[cfg(test)]
pub use notifier::MockNotificationChannel;
