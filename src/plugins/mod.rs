pub mod extractors;
pub mod notifiers;
pub mod registry;
pub mod traits;

pub use registry::ExtractorRegistry;
pub use traits::{NotificationChannel, PriceExtractor};
