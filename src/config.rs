use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{NotifierError, Result};

/// Environment variable holding the Discord bot token
pub const ENV_DISCORD_TOKEN: &str = "DISCORD_TOKEN";
/// Environment variable holding the recipient's Discord user id
pub const ENV_DISCORD_TARGET_USER_ID: &str = "DISCORD_TARGET_USER_ID";
/// Environment variable overriding the polling interval
pub const ENV_POLLING_INTERVAL_MINUTES: &str = "GMAIL_POLLING_INTERVAL_MINUTES";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub recipient_id: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            recipient_id: String::new(),
            api_base: default_api_base(),
            gateway_url: default_gateway_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_polling_interval_minutes")]
    pub polling_interval_minutes: u64,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            polling_interval_minutes: default_polling_interval_minutes(),
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_retry_delay_minutes")]
    pub retry_delay_minutes: u64,
    #[serde(default = "default_pacing_delay_secs")]
    pub pacing_delay_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_delay_minutes: default_retry_delay_minutes(),
            pacing_delay_secs: default_pacing_delay_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

impl StorageConfig {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Legacy flat JSON array of processed message ids
    pub fn legacy_processed_ids_path(&self) -> PathBuf {
        self.data_dir.join("processed_ids.json")
    }

    /// Legacy Google client-secret file
    pub fn legacy_credentials_path(&self) -> PathBuf {
        self.data_dir.join("credentials.json")
    }

    /// Legacy authorized-user token file
    pub fn legacy_token_path(&self) -> PathBuf {
        self.data_dir.join("token.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Minutes to wait for an upload or code before giving up; 0 waits forever
    #[serde(default = "default_prompt_timeout_minutes")]
    pub prompt_timeout_minutes: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            prompt_timeout_minutes: default_prompt_timeout_minutes(),
        }
    }
}

impl AuthConfig {
    pub fn prompt_timeout(&self) -> Option<Duration> {
        match self.prompt_timeout_minutes {
            0 => None,
            minutes => Some(minutes_to_duration(minutes)),
        }
    }
}

/// Longest polling interval or retry delay accepted: one week
pub const MAX_DELAY_MINUTES: u64 = 7 * 24 * 60;

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_polling_interval_minutes() -> u64 {
    1
}

fn default_max_results() -> u32 {
    10
}

fn default_retry_delay_minutes() -> u64 {
    5
}

fn default_pacing_delay_secs() -> u64 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_database_file() -> String {
    "gmail-notifier.sqlite".to_string()
}

fn default_prompt_timeout_minutes() -> u64 {
    30
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NotifierError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| NotifierError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load the file, apply environment overrides and validate
    pub async fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over the config file
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(token) = env::var(ENV_DISCORD_TOKEN) {
            if !token.trim().is_empty() {
                self.discord.token = token.trim().to_string();
            }
        }
        if let Ok(recipient) = env::var(ENV_DISCORD_TARGET_USER_ID) {
            if !recipient.trim().is_empty() {
                self.discord.recipient_id = recipient.trim().to_string();
            }
        }
        if let Ok(interval) = env::var(ENV_POLLING_INTERVAL_MINUTES) {
            self.gmail.polling_interval_minutes = interval.trim().parse().map_err(|_| {
                NotifierError::ConfigError(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_POLLING_INTERVAL_MINUTES, interval
                ))
            })?;
        }
        Ok(())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                NotifierError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| NotifierError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| NotifierError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.discord.token.is_empty() {
            missing.push(ENV_DISCORD_TOKEN);
        }
        if self.discord.recipient_id.is_empty() {
            missing.push(ENV_DISCORD_TARGET_USER_ID);
        }
        if !missing.is_empty() {
            return Err(NotifierError::ConfigError(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if !self.discord.recipient_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(NotifierError::ConfigError(format!(
                "discord.recipient_id must be a numeric user id, got '{}'",
                self.discord.recipient_id
            )));
        }

        if self.gmail.polling_interval_minutes == 0 {
            return Err(NotifierError::ConfigError(
                "gmail.polling_interval_minutes must be at least 1".to_string(),
            ));
        }

        for (name, minutes) in [
            ("gmail.polling_interval_minutes", self.gmail.polling_interval_minutes),
            ("delivery.retry_delay_minutes", self.delivery.retry_delay_minutes),
            ("auth.prompt_timeout_minutes", self.auth.prompt_timeout_minutes),
        ] {
            if minutes > MAX_DELAY_MINUTES {
                return Err(NotifierError::ConfigError(format!(
                    "{} must be at most {} (one week), got {}",
                    name, MAX_DELAY_MINUTES, minutes
                )));
            }
        }

        // Gmail caps messages.list at 500 per page
        if self.gmail.max_results == 0 || self.gmail.max_results > 500 {
            return Err(NotifierError::ConfigError(
                "gmail.max_results must be between 1 and 500".to_string(),
            ));
        }

        if self.storage.database_file.is_empty() {
            return Err(NotifierError::ConfigError(
                "storage.database_file cannot be empty".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        minutes_to_duration(self.gmail.polling_interval_minutes)
    }

    pub fn retry_delay(&self) -> Duration {
        minutes_to_duration(self.delivery.retry_delay_minutes)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_secs(self.delivery.pacing_delay_secs)
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let mut config = Self::default();
        config.discord.token = "your-bot-token".to_string();
        config.discord.recipient_id = "123456789012345678".to_string();
        config.save(path).await
    }
}
