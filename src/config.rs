use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::models::ChannelKind;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub history: HistoryConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/pricewatcher.db".to_string(),
            max_connections: 5,
            acquire_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub user_agent: String,
    /// Per request timeout in seconds.
    pub request_timeout: u64,
    /// Minimum delay between two requests to the same host, in milliseconds.
    /// Zero disables the politeness delay.
    pub request_delay_ms: u64,
    /// Size of the fetch/extract worker pool.
    pub workers: usize,
    /// Currency assigned when a page does not reveal one.
    pub default_currency: String,
    /// Route requests through ScraperAPI when set.
    pub scraper_api_key: Option<String>,
    pub scraper_api_render: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string(),
            request_timeout: 30,
            request_delay_ms: 2000,
            workers: 5,
            default_currency: "BRL".to_string(),
            scraper_api_key: None,
            scraper_api_render: true,
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduled cycles.
    pub interval_secs: u64,
    /// Overall deadline for one cycle, in seconds.
    pub cycle_timeout_secs: u64,
    /// Run a cycle as soon as the scheduler starts.
    pub run_on_startup: bool,
    /// Page size used when enumerating tracked products.
    pub page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            cycle_timeout_secs: 600,
            run_on_startup: true,
            page_size: 200,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// When set, an unchanged price is still written to history if the newest
    /// entry is older than this many seconds. History is delta-only otherwise.
    pub force_snapshot_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub email: EmailConfig,
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
}

impl NotificationsConfig {
    pub fn enabled_channels(&self) -> Vec<ChannelKind> {
        let mut channels = Vec::new();
        if self.email.enabled {
            channels.push(ChannelKind::Email);
        }
        if self.telegram.enabled {
            channels.push(ChannelKind::Telegram);
        }
        if self.discord.enabled {
            channels.push(ChannelKind::Discord);
        }
        channels
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: String,
    pub from_name: String,
    pub default_recipient: Option<String>,
    pub use_tls: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            username: None,
            password: None,
            from_address: "pricewatcher@localhost".to_string(),
            from_name: "PriceWatcher".to_string(),
            default_recipient: None,
            use_tls: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    pub chat_id: Option<String>,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            chat_id: None,
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub username: String,
    pub avatar_url: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            username: "PriceWatcher".to_string(),
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Write a daily rolling log file into this directory in addition to stdout.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "price_watcher=info".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9001".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Layered load: built-in defaults, `config/default`, `config/{RUN_MODE}`,
    /// `config/local`, an explicit file, then `PRICEWATCHER__*` variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(File::with_name("config/local").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let s = builder
            .add_source(Environment::with_prefix("PRICEWATCHER").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Plain DATABASE_URL is honoured unless the prefixed variable is set.
        if env::var("PRICEWATCHER__DATABASE__URL").is_err() {
            if let Ok(url) = env::var("DATABASE_URL") {
                config.database.url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.scraper.workers == 0 {
            return Err(ConfigError::Message("Scraper workers must be greater than 0".into()));
        }

        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }

        if self.scraper.user_agent.trim().is_empty() {
            return Err(ConfigError::Message("Scraper user_agent must not be empty".into()));
        }

        let currency = self.scraper.default_currency.as_str();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Message(
                "Scraper default_currency must be a 3 letter ISO code".into(),
            ));
        }

        if self.scheduler.interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler interval_secs must be greater than 0".into()));
        }

        if self.scheduler.cycle_timeout_secs == 0 {
            return Err(ConfigError::Message("Scheduler cycle_timeout_secs must be greater than 0".into()));
        }

        if self.scheduler.page_size == 0 {
            return Err(ConfigError::Message("Scheduler page_size must be greater than 0".into()));
        }

        if self.history.force_snapshot_interval_secs == Some(0) {
            return Err(ConfigError::Message(
                "History force_snapshot_interval_secs must be greater than 0 when set".into(),
            ));
        }

        let email = &self.notifications.email;
        if email.enabled && email.smtp_port == 0 {
            return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
        }

        let telegram = &self.notifications.telegram;
        if telegram.enabled && telegram.token.trim().is_empty() {
            return Err(ConfigError::Message("Telegram token is required when telegram is enabled".into()));
        }

        let discord = &self.notifications.discord;
        if discord.enabled {
            match &discord.webhook_url {
                Some(url) if url.starts_with("https://discord.com/api/webhooks/")
                    || url.starts_with("https://discordapp.com/api/webhooks/") => {}
                _ => {
                    return Err(ConfigError::Message("Invalid Discord webhook URL format".into()));
                }
            }
        }

        if self.metrics.enabled && self.metrics.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Message("Metrics listen must be a socket address".into()));
        }

        Ok(())
    }
}
