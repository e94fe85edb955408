pub mod alert_evaluator;
pub mod app;
pub mod config;
pub mod dispatcher;
pub mod fetcher;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod plugins;
pub mod price_comparator;
pub mod scheduler;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use app::App;
pub use config::AppConfig;
pub use monitor::{CycleReport, PriceMonitor, TriggerSource};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
