//! Application configuration loading from config.toml and the environment.
//!
//! Tunables live in `config.toml`; every section is optional and falls back to
//! defaults. Secrets (`DATABASE_URL`, `JWT_SECRET`, `TELEGRAM_BOT_TOKEN`) are
//! read from the environment and override anything in the file.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Default take-order fee: 3 000 roubles in kopecks
pub const DEFAULT_TAKE_ORDER_FEE: i64 = 300_000;
/// Default starting balance for new masters: 10 000 roubles in kopecks
pub const DEFAULT_MASTER_START_BALANCE: i64 = 1_000_000;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Database connection string
    pub database_url: String,
    /// Base URL of the web client, used to build access links in notifications
    pub application_url: String,
    /// Amount debited from a master when they take an order, in kopecks
    pub take_order_fee: i64,
    /// Balance credited to a newly registered master, in kopecks
    pub master_start_balance: i64,
    /// Access token settings
    pub auth: AuthConfig,
    /// Identity the background sweeper acts as
    pub admin: AdminConfig,
    /// Background sweeper schedule and thresholds
    pub sweeper: SweeperConfig,
    /// Notification queue and Telegram transport
    pub notifications: NotificationConfig,
}

/// Access token settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing tokens
    pub jwt_secret: String,
    /// Token lifetime in hours
    pub token_ttl_hours: i64,
}

/// Admin account seeded at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Display name
    pub name: String,
    /// Login email, also used to look the admin up
    pub email: String,
    /// Contact phone
    pub phone: String,
}

/// Background sweeper schedule and thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Pause between sweeps
    pub interval_secs: u64,
    /// CREATED orders idle this long are cancelled
    pub cancel_after_hours: i64,
    /// In-progress orders idle this long are completed
    pub complete_after_days: i64,
    /// CREATED orders idle this long are reported to admins once
    pub stale_notice_minutes: i64,
}

/// Notification queue and Telegram transport
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Bounded queue size between workflow and dispatcher
    pub queue_capacity: usize,
    /// Telegram Bot API base URL
    pub telegram_api_url: String,
    /// Bot token; when absent notifications are only logged
    pub telegram_bot_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: super::database::DEFAULT_DATABASE_URL.to_string(),
            application_url: "http://localhost:3000".to_string(),
            take_order_fee: DEFAULT_TAKE_ORDER_FEE,
            master_start_balance: DEFAULT_MASTER_START_BALANCE,
            auth: AuthConfig::default(),
            admin: AdminConfig::default(),
            sweeper: SweeperConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: 24 * 30,
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            name: "Administrator".to_string(),
            email: "admin@gruzhub.local".to_string(),
            phone: "+70000000000".to_string(),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            cancel_after_hours: 48,
            complete_after_days: 31,
            stale_notice_minutes: 15,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegram_bot_token: None,
        }
    }
}

impl SweeperConfig {
    /// Idle time after which a CREATED order is cancelled.
    #[must_use]
    pub fn cancel_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cancel_after_hours)
    }

    /// Idle time after which an in-progress order is completed.
    #[must_use]
    pub fn complete_after(&self) -> chrono::Duration {
        chrono::Duration::days(self.complete_after_days)
    }

    /// Idle time after which admins hear about a CREATED order.
    #[must_use]
    pub fn stale_notice_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_notice_minutes)
    }
}

impl AppConfig {
    /// Overrides secrets and the database URL from the environment.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.notifications.telegram_bot_token = Some(token);
        }
        self
    }

    /// Rejects settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(Error::Config {
                message: "JWT secret is not set (JWT_SECRET)".to_string(),
            });
        }
        if self.take_order_fee < 0 || self.master_start_balance < 0 {
            return Err(Error::Config {
                message: "Fee and start balance must be non-negative".to_string(),
            });
        }
        if self.notifications.queue_capacity == 0 {
            return Err(Error::Config {
                message: "Notification queue capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;
    parse_config(&contents)
}

/// Loads `./config.toml` if present, applies environment overrides and validates.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = Path::new("config.toml");
    let config = if path.exists() {
        tracing::debug!("Loading configuration from {:?}", path);
        load_config(path)?
    } else {
        tracing::warn!("config.toml not found, using defaults");
        AppConfig::default()
    };
    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}
