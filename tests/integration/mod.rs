// Integration tests for PriceWatcher
// These drive the whole pipeline against a SQLite file and mock HTTP servers

pub mod pipeline_tests;
pub mod scheduler_tests;

use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use price_watcher::config::DatabaseConfig;
use price_watcher::storage::{SqliteStorage, Storage};
use price_watcher::{App, AppConfig};

pub const TELEGRAM_TOKEN: &str = "test-token";
pub const TELEGRAM_CHAT: &str = "1001";

/// Test configuration: no politeness delay, short timeouts and a Telegram
/// channel pointed at `telegram_api`.
pub fn get_test_config(telegram_api: Option<&str>) -> AppConfig {
    let mut config = AppConfig::default();
    config.scraper.user_agent = "PriceWatcher-Test/1.0".to_string();
    config.scraper.request_delay_ms = 0;
    config.scraper.request_timeout = 5;
    config.scraper.workers = 3;
    config.scheduler.cycle_timeout_secs = 30;
    config.scheduler.run_on_startup = false;

    if let Some(api_base) = telegram_api {
        config.notifications.telegram.enabled = true;
        config.notifications.telegram.token = TELEGRAM_TOKEN.to_string();
        config.notifications.telegram.chat_id = Some(TELEGRAM_CHAT.to_string());
        config.notifications.telegram.api_base = api_base.to_string();
    }
    config
}

/// App backed by a fresh SQLite file. Keep the `TempDir` alive for the test.
pub async fn create_test_app(config: AppConfig) -> anyhow::Result<(App, TempDir)> {
    let dir = tempfile::tempdir()?;
    let database = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("test.db").display()),
        max_connections: 2,
        acquire_timeout: 10,
    };

    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::connect(&database).await?);
    let mut config = config;
    config.database = database;

    Ok((App::with_storage(config, storage)?, dir))
}

pub fn product_page(name: &str, price: &str) -> String {
    format!(
        r#"<html><head>
            <title>{name} | Loja</title>
            <meta property="og:title" content="{name}">
            <meta property="product:price:amount" content="{price}">
            <meta property="product:price:currency" content="BRL">
        </head><body><h1>{name}</h1></body></html>"#
    )
}

/// Serve `page` at `page_path`, replacing whatever the shop served before.
pub async fn serve_page(shop: &MockServer, page_path: &str, page: String) {
    shop.reset().await;
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(shop)
        .await;
}
